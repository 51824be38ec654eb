// Core services
pub mod deliveries;
pub mod orders;
pub mod products;
pub mod quote_locks;
pub mod quotes;

// Verification code sealing and short-code derivation
pub mod codes;

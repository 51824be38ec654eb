//! Property-based tests for the pure core of the API.
//!
//! These use proptest to verify invariants across a wide range of inputs:
//! code sealing must round-trip and resist tampering for arbitrary payloads,
//! short codes must keep their spoken-digits shape, and line totals must
//! behave like money arithmetic.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use supplyline_api::services::codes::{
    self, CodeKey, DeliveryCodePayload, CODE_TTL_HOURS,
};
use supplyline_api::services::quotes::line_subtotal;
use uuid::Uuid;

fn test_key() -> CodeKey {
    CodeKey::derive("property-test-code-secret-0123456789")
}

// Strategies for generating test data
fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<[u8; 16]>().prop_map(Uuid::from_bytes)
}

fn payload_strategy() -> impl Strategy<Value = DeliveryCodePayload> {
    (
        uuid_strategy(),
        uuid_strategy(),
        uuid_strategy(),
        -1000i64..1000i64,
        any::<u64>(),
    )
        .prop_map(|(delivery_id, order_id, client_id, hours, nonce)| DeliveryCodePayload {
            delivery_id,
            order_id,
            client_id,
            issued_at: Utc::now() + Duration::hours(hours),
            nonce,
        })
}

fn price_strategy() -> impl Strategy<Value = (u64, u8)> {
    (0u64..1_000_000, 0u8..100)
}

// Property: sealed codes round-trip and stay bound to their payload
proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn sealing_round_trips_for_any_payload(payload in payload_strategy()) {
        let key = test_key();
        let code = codes::seal(&payload, &key).unwrap();
        let opened = codes::open(&code, &key).unwrap();
        prop_assert_eq!(opened, payload);
    }

    #[test]
    fn sealed_codes_are_url_safe(payload in payload_strategy()) {
        let code = codes::seal(&payload, &test_key()).unwrap();
        prop_assert!(
            code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "Sealed code contains non-url-safe characters: {}",
            code
        );
    }

    #[test]
    fn flipping_any_bit_breaks_authentication(
        payload in payload_strategy(),
        position in any::<usize>(),
        bit in 0u8..8,
    ) {
        let key = test_key();
        let code = codes::seal(&payload, &key).unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&code).unwrap();
        let index = position % bytes.len();
        bytes[index] ^= 1 << bit;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        prop_assert!(
            codes::open(&tampered, &key).is_err(),
            "Tampered code at byte {} still opened",
            index
        );
    }

    #[test]
    fn a_different_key_never_opens_a_code(payload in payload_strategy(), salt in "[a-z0-9]{8,32}") {
        let code = codes::seal(&payload, &test_key()).unwrap();
        let other = CodeKey::derive(&format!("unrelated-{}", salt));
        prop_assert!(codes::open(&code, &other).is_err());
    }
}

// Property: the acceptance window is measured from the sealed issue time
proptest! {
    #[test]
    fn codes_inside_the_window_are_accepted(minutes in 0i64..(CODE_TTL_HOURS * 60)) {
        let now = Utc::now();
        let payload = DeliveryCodePayload {
            issued_at: now - Duration::minutes(minutes),
            ..DeliveryCodePayload::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
        };
        prop_assert!(!payload.is_expired(now), "Code expired after only {} minutes", minutes);
    }

    #[test]
    fn codes_past_the_window_are_expired(minutes in (CODE_TTL_HOURS * 60 + 1)..1_000_000i64) {
        let now = Utc::now();
        let payload = DeliveryCodePayload {
            issued_at: now - Duration::minutes(minutes),
            ..DeliveryCodePayload::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
        };
        prop_assert!(payload.is_expired(now), "Code still live after {} minutes", minutes);
    }
}

// Property: short codes always keep their spoken shape
proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn short_codes_are_six_ascii_digits(delivery_id in uuid_strategy(), order_id in uuid_strategy()) {
        let code = codes::short_code(delivery_id, order_id);
        prop_assert_eq!(code.len(), 6, "Short code has wrong length: {}", code);
        prop_assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn short_codes_are_deterministic(delivery_id in uuid_strategy(), order_id in uuid_strategy()) {
        prop_assert_eq!(
            codes::short_code(delivery_id, order_id),
            codes::short_code(delivery_id, order_id)
        );
    }
}

// Property: line subtotals behave like cent arithmetic
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn line_subtotal_matches_cent_arithmetic(
        (dollars, cents) in price_strategy(),
        quantity in 0i32..1_000_000,
    ) {
        let price: Decimal = format!("{}.{:02}", dollars, cents).parse().unwrap();
        let subtotal = line_subtotal(quantity, price);

        let expected_cents = (u128::from(dollars) * 100 + u128::from(cents)) * quantity as u128;
        let expected = Decimal::from_i128_with_scale(expected_cents as i128, 2);
        prop_assert_eq!(subtotal, expected, "{} x {} computed wrong", quantity, price);
    }

    #[test]
    fn zero_quantity_or_zero_price_means_zero(
        (dollars, cents) in price_strategy(),
        quantity in 0i32..1_000_000,
    ) {
        let price: Decimal = format!("{}.{:02}", dollars, cents).parse().unwrap();
        prop_assert_eq!(line_subtotal(0, price), Decimal::ZERO);
        prop_assert_eq!(line_subtotal(quantity, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn splitting_a_line_preserves_the_total(
        (dollars, cents) in price_strategy(),
        first in 0i32..500_000,
        second in 0i32..500_000,
    ) {
        let price: Decimal = format!("{}.{:02}", dollars, cents).parse().unwrap();
        prop_assert_eq!(
            line_subtotal(first + second, price),
            line_subtotal(first, price) + line_subtotal(second, price)
        );
    }

    #[test]
    fn subtotals_are_never_negative(
        (dollars, cents) in price_strategy(),
        quantity in 0i32..1_000_000,
    ) {
        let price: Decimal = format!("{}.{:02}", dollars, cents).parse().unwrap();
        prop_assert!(!line_subtotal(quantity, price).is_sign_negative());
    }
}

//! Fuzzes `ladder_core::fixed_point::to_base`/`from_base` against arbitrary
//! decimals, looking for panics rather than a specific numeric answer.

#![no_main]

use ladder_core::fixed_point;
use libfuzzer_sys::fuzz_target;
use rust_decimal::Decimal;

fuzz_target!(|data: &[u8]| {
    if data.len() < 10 {
        return;
    }

    let mantissa = i64::from_le_bytes(data[0..8].try_into().unwrap());
    let scale = (data[8] % 29) as u32;
    let exp = (data[9] % 19) as u32;
    let value = Decimal::new(mantissa, scale);

    match fixed_point::to_base(value, exp) {
        Ok(base) => {
            // to_base never succeeds on a negative input.
            assert!(!value.is_sign_negative());
            let back = fixed_point::from_base(base, exp);
            assert!(!back.is_sign_negative());
        }
        Err(_) => {
            assert!(value.is_sign_negative());
        }
    }
});

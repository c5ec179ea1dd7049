//! Shared low-level helpers: fades, u-law decoding and time conversions.

pub mod fader;
pub mod time;
pub mod ulaw;

// -------------------------------------------------------------------------------------------------

const MINUS_INF_IN_DB: f32 = -200.0f32;

// -------------------------------------------------------------------------------------------------

pub fn linear_to_db(value: f32) -> f32 {
    const LIN_TO_DB_FACTOR: f32 = 20.0f32 / std::f32::consts::LN_10;
    if value == 1.0 {
        return 0.0; // avoid rounding errors at exactly 0 dB
    } else if value > 1e-12f32 {
        return value.ln() * LIN_TO_DB_FACTOR;
    }
    MINUS_INF_IN_DB
}

// -------------------------------------------------------------------------------------------------

pub fn db_to_linear(value: f32) -> f32 {
    const DB_TO_LIN_FACTOR: f32 = std::f32::consts::LN_10 / 20.0f32;
    if value == 0.0f32 {
        return 1.0f32; // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        return (value * DB_TO_LIN_FACTOR).exp();
    }
    0.0f32
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_eq_with_epsilon {
        ($x:expr, $y:expr, $d:expr) => {
            assert!(($x - $y).abs() < $d, "{} != {}", $x, $y);
        };
    }

    #[test]
    fn lin_db_conversion() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), MINUS_INF_IN_DB);
        assert_eq!(db_to_linear(MINUS_INF_IN_DB), 0.0);
        assert_eq!(db_to_linear(0.0), 1.0);
        assert_eq_with_epsilon!(linear_to_db(db_to_linear(20.0)), 20.0, 0.0001);
        assert_eq_with_epsilon!(linear_to_db(db_to_linear(-12.0)), -12.0, 0.0001);
        assert_eq_with_epsilon!(db_to_linear(-6.0), 0.501, 0.001);
    }
}

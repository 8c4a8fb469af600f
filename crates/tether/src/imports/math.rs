//! `teavmMath`: the host math library.

use super::{ImportObject, MATH_MODULE, number_arg};
use crate::guest::GuestValue;

type Unary = fn(f64) -> f64;
type Binary = fn(f64, f64) -> f64;

const UNARY: &[(&str, Unary)] = &[
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("tan", f64::tan),
    ("asin", f64::asin),
    ("acos", f64::acos),
    ("atan", f64::atan),
    ("exp", f64::exp),
    ("log", f64::ln),
    ("log10", f64::log10),
    ("sqrt", f64::sqrt),
    ("cbrt", f64::cbrt),
    ("ceil", f64::ceil),
    ("floor", f64::floor),
    ("round", round),
    ("abs", f64::abs),
    ("sign", sign),
];

const BINARY: &[(&str, Binary)] = &[
    ("atan2", f64::atan2),
    ("pow", pow),
    ("hypot", f64::hypot),
    ("min", min),
    ("max", max),
];

/// Rounds half-way cases towards positive infinity.
fn round(x: f64) -> f64 {
    if !x.is_finite() || x.fract() == 0.0 {
        return x;
    }
    let floor = x.floor();
    let rounded = if x - floor >= 0.5 { floor + 1.0 } else { floor };
    // keep the sign of values in [-0.5, 0)
    if rounded == 0.0 && x < 0.0 { -0.0 } else { rounded }
}

fn sign(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 { x } else { x.signum() }
}

/// `1 ** NaN` and `(-1) ** ±Infinity` are NaN on the host.
fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// NaN-propagating; `-0` is smaller than `+0`.
fn min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else {
        a.min(b)
    }
}

fn max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else {
        a.max(b)
    }
}

pub(super) fn install(imports: &mut ImportObject) {
    for &(name, function) in UNARY {
        imports.define(MATH_MODULE, name, move |args| {
            Ok(Some(GuestValue::F64(function(number_arg(args, 0)?))))
        });
    }
    for &(name, function) in BINARY {
        imports.define(MATH_MODULE, name, move |args| {
            Ok(Some(GuestValue::F64(function(number_arg(args, 0)?, number_arg(args, 1)?))))
        });
    }
    imports.define(MATH_MODULE, "random", |_| Ok(Some(GuestValue::F64(rand::random::<f64>()))));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[f64]) -> f64 {
        let mut imports = ImportObject::new();
        install(&mut imports);
        let args: Vec<GuestValue> = args.iter().copied().map(GuestValue::F64).collect();
        let function = imports.resolve(MATH_MODULE, name).unwrap();
        function(&args).unwrap().unwrap().as_f64().unwrap()
    }

    #[test]
    fn rounding_matches_the_host() {
        assert_eq!(call("round", &[2.5]), 3.0);
        assert_eq!(call("round", &[-2.5]), -2.0);
        assert_eq!(call("round", &[-2.6]), -3.0);
        assert!(call("round", &[-0.4]).is_sign_negative());
        assert_eq!(call("round", &[0.499_999_999_999_999_94]), 0.0);
        assert_eq!(call("round", &[-0.500_000_000_000_000_1]), -1.0);
        assert_eq!(call("floor", &[-1.5]), -2.0);
        assert_eq!(call("ceil", &[1.1]), 2.0);
    }

    #[test]
    fn min_max_propagate_nan() {
        assert!(call("min", &[1.0, f64::NAN]).is_nan());
        assert!(call("max", &[f64::NAN, 1.0]).is_nan());
        assert_eq!(call("min", &[3.0, -1.0]), -1.0);
        assert_eq!(call("max", &[3.0, -1.0]), 3.0);
        assert!(call("min", &[0.0, -0.0]).is_sign_negative());
        assert!(call("max", &[-0.0, 0.0]).is_sign_positive());
    }

    #[test]
    fn sign_and_pow() {
        assert_eq!(call("sign", &[-3.0]), -1.0);
        assert!(call("sign", &[-0.0]).is_sign_negative());
        assert!(call("sign", &[f64::NAN]).is_nan());
        assert_eq!(call("pow", &[2.0, 10.0]), 1024.0);
        assert!(call("pow", &[1.0, f64::INFINITY]).is_nan());
        assert!(call("pow", &[1.0, f64::NAN]).is_nan());
    }

    #[test]
    fn transcendental_functions() {
        assert_eq!(call("log", &[1.0]), 0.0);
        assert_eq!(call("log10", &[1000.0]), 3.0);
        assert_eq!(call("sqrt", &[16.0]), 4.0);
        assert_eq!(call("cbrt", &[27.0]), 3.0);
        assert_eq!(call("hypot", &[3.0, 4.0]), 5.0);
        assert_eq!(call("atan2", &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn random_is_in_the_unit_interval() {
        for _ in 0..100 {
            let x = call("random", &[]);
            assert!((0.0..1.0).contains(&x));
        }
    }
}

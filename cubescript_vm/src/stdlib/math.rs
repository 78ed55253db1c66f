//! Arithmetic, bitwise, comparison and transcendental commands.
//!
//! The variadic operators declare `i1V`/`f1V`: one typed parameter with
//! a repeat mark, so actuals cycle through the coercion and arrive as a
//! vector. Trigonometry works in degrees.

use cubescript_core::state::CsState;
use cubescript_core::value::{CsFloat, CsInt, Value};
use cubescript_core::CsResult;

const RAD: CsFloat = std::f64::consts::PI / 180.0;

pub fn init(cs: &mut CsState) -> CsResult<()> {
    macro_rules! float_fn {
        ($name:expr, $f:expr) => {
            cs.new_command($name, "f", move |_, args, res| {
                let x: CsFloat = args[0].get_float();
                *res = Value::Float($f(x));
                Ok(())
            })?;
        };
    }
    float_fn!("sin", |x: CsFloat| (x * RAD).sin());
    float_fn!("cos", |x: CsFloat| (x * RAD).cos());
    float_fn!("tan", |x: CsFloat| (x * RAD).tan());
    float_fn!("asin", |x: CsFloat| x.asin() / RAD);
    float_fn!("acos", |x: CsFloat| x.acos() / RAD);
    float_fn!("atan", |x: CsFloat| x.atan() / RAD);
    float_fn!("sqrt", |x: CsFloat| x.sqrt());
    float_fn!("loge", |x: CsFloat| x.ln());
    float_fn!("log2", |x: CsFloat| x.ln() / std::f64::consts::LN_2);
    float_fn!("log10", |x: CsFloat| x.log10());
    float_fn!("exp", |x: CsFloat| x.exp());
    float_fn!("absf", |x: CsFloat| x.abs());
    float_fn!("floor", |x: CsFloat| x.floor());
    float_fn!("ceil", |x: CsFloat| x.ceil());

    cs.new_command("atan2", "ff", |_, args, res| {
        *res = Value::Float(args[0].get_float().atan2(args[1].get_float()) / RAD);
        Ok(())
    })?;

    cs.new_command("abs", "i", |_, args, res| {
        *res = Value::Int(args[0].get_int().wrapping_abs());
        Ok(())
    })?;

    cs.new_command("round", "ff", |_, args, res| {
        let mut r = args[0].get_float();
        let step = args[1].get_float();
        if step > 0.0 {
            r += step * if r < 0.0 { -0.5 } else { 0.5 };
            r -= r % step;
        } else {
            r = if r < 0.0 {
                (r - 0.5).ceil()
            } else {
                (r + 0.5).floor()
            };
        }
        *res = Value::Float(r);
        Ok(())
    })?;

    macro_rules! min_max {
        ($name:expr, $fmt:expr, $get:ident, $wrap:path, $pick:ident) => {
            cs.new_command($name, $fmt, |_, args, res| {
                let mut v = args.first().map_or_else(Default::default, Value::$get);
                for a in args.iter().skip(1) {
                    v = v.$pick(a.$get());
                }
                *res = $wrap(v);
                Ok(())
            })?;
        };
    }
    min_max!("min", "i1V", get_int, Value::Int, min);
    min_max!("max", "i1V", get_int, Value::Int, max);
    min_max!("minf", "f1V", get_float, Value::Float, min);
    min_max!("maxf", "f1V", get_float, Value::Float, max);

    macro_rules! int_op {
        ($name:expr, $init:expr, $fold:expr, $unary:expr) => {
            cs.new_command($name, "i1V", move |_, args, res| {
                let fold: fn(CsInt, CsInt) -> CsInt = $fold;
                let unary: fn(CsInt) -> CsInt = $unary;
                let val = if args.len() >= 2 {
                    let mut v = args[0].get_int();
                    for a in &args[1..] {
                        v = fold(v, a.get_int());
                    }
                    v
                } else {
                    unary(args.first().map_or($init, Value::get_int))
                };
                *res = Value::Int(val);
                Ok(())
            })?;
        };
    }
    int_op!("+", 0, |a, b| a.wrapping_add(b), |v| v);
    int_op!("*", 1, |a, b| a.wrapping_mul(b), |v| v);
    int_op!("-", 0, |a, b| a.wrapping_sub(b), |v: CsInt| v.wrapping_neg());
    int_op!("^", 0, |a, b| a ^ b, |v: CsInt| !v);
    int_op!("~", 0, |a, b| a ^ b, |v: CsInt| !v);
    int_op!("&", 0, |a, b| a & b, |v| v);
    int_op!("|", 0, |a, b| a | b, |v| v);
    int_op!("^~", 0, |a, b| a ^ !b, |v| v);
    int_op!("&~", 0, |a, b| a & !b, |v| v);
    int_op!("|~", 0, |a, b| a | !b, |v| v);
    int_op!(
        "<<",
        0,
        |a, b| if (0..64).contains(&b) { a.wrapping_shl(b as u32) } else { 0 },
        |v| v
    );
    int_op!(">>", 0, |a, b| a >> b.clamp(0, 63), |v| v);
    int_op!("div", 0, |a: CsInt, b| if b != 0 { a.wrapping_div(b) } else { 0 }, |v| v);
    int_op!("mod", 0, |a: CsInt, b| if b != 0 { a.wrapping_rem(b) } else { 0 }, |v| v);

    macro_rules! float_op {
        ($name:expr, $init:expr, $fold:expr, $unary:expr) => {
            cs.new_command($name, "f1V", move |_, args, res| {
                let fold: fn(CsFloat, CsFloat) -> CsFloat = $fold;
                let unary: fn(CsFloat) -> CsFloat = $unary;
                let val = if args.len() >= 2 {
                    let mut v = args[0].get_float();
                    for a in &args[1..] {
                        v = fold(v, a.get_float());
                    }
                    v
                } else {
                    unary(args.first().map_or($init, Value::get_float))
                };
                *res = Value::Float(val);
                Ok(())
            })?;
        };
    }
    float_op!("+f", 0.0, |a, b| a + b, |v| v);
    float_op!("*f", 1.0, |a, b| a * b, |v| v);
    float_op!("-f", 0.0, |a, b| a - b, |v: CsFloat| -v);
    float_op!("divf", 0.0, |a, b| if b != 0.0 { a / b } else { 0.0 }, |v| v);
    float_op!("modf", 0.0, |a, b| if b != 0.0 { a % b } else { 0.0 }, |v| v);
    float_op!("pow", 0.0, |a: CsFloat, b| a.powf(b), |v| v);

    macro_rules! int_cmp {
        ($name:expr, $op:expr) => {
            cs.new_command($name, "i1V", move |_, args, res| {
                let op: fn(&CsInt, &CsInt) -> bool = $op;
                let val = if args.len() >= 2 {
                    let mut ok = true;
                    for pair in args.windows(2) {
                        ok = op(&pair[0].get_int(), &pair[1].get_int());
                        if !ok {
                            break;
                        }
                    }
                    ok
                } else {
                    op(&args.first().map_or(0, Value::get_int), &0)
                };
                *res = Value::from(val);
                Ok(())
            })?;
        };
    }
    int_cmp!("=", CsInt::eq);
    int_cmp!("!=", CsInt::ne);
    int_cmp!("<", CsInt::lt);
    int_cmp!(">", CsInt::gt);
    int_cmp!("<=", CsInt::le);
    int_cmp!(">=", CsInt::ge);

    macro_rules! float_cmp {
        ($name:expr, $op:expr) => {
            cs.new_command($name, "f1V", move |_, args, res| {
                let op: fn(&CsFloat, &CsFloat) -> bool = $op;
                let val = if args.len() >= 2 {
                    let mut ok = true;
                    for pair in args.windows(2) {
                        ok = op(&pair[0].get_float(), &pair[1].get_float());
                        if !ok {
                            break;
                        }
                    }
                    ok
                } else {
                    op(&args.first().map_or(0.0, Value::get_float), &0.0)
                };
                *res = Value::from(val);
                Ok(())
            })?;
        };
    }
    float_cmp!("=f", CsFloat::eq);
    float_cmp!("!=f", CsFloat::ne);
    float_cmp!("<f", CsFloat::lt);
    float_cmp!(">f", CsFloat::gt);
    float_cmp!("<=f", CsFloat::le);
    float_cmp!(">=f", CsFloat::ge);

    Ok(())
}

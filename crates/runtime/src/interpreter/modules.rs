//! Importable modules: `math`, `random`, `json` and `time`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::builtins::float_to_int;
use super::call::CallArgs;
use super::exceptions::{fail, type_error, value_error, ExceptionKind, Exec, Interrupt};
use super::json;
use super::value::{Attrs, Module, NativeFunction, Value};
use super::Interpreter;
use crate::ast::BinOp;
use crate::sandbox::ModuleKind;

/// Longest single `time.sleep`; the run deadline always comes first.
const MAX_SLEEP: Duration = Duration::from_secs(24 * 60 * 60);

macro_rules! functions {
    ($($name:literal => $func:ident),* $(,)?) => {
        &[$(NativeFunction { name: $name, func: $func }),*]
    };
}

static MATH_FUNCTIONS: &[NativeFunction] = functions! {
    "sqrt" => math_sqrt,
    "isqrt" => math_isqrt,
    "floor" => math_floor,
    "ceil" => math_ceil,
    "trunc" => math_trunc,
    "fabs" => math_fabs,
    "pow" => math_pow,
    "exp" => math_exp,
    "log" => math_log,
    "log2" => math_log2,
    "log10" => math_log10,
    "sin" => math_sin,
    "cos" => math_cos,
    "tan" => math_tan,
    "asin" => math_asin,
    "acos" => math_acos,
    "atan" => math_atan,
    "atan2" => math_atan2,
    "hypot" => math_hypot,
    "degrees" => math_degrees,
    "radians" => math_radians,
    "factorial" => math_factorial,
    "gcd" => math_gcd,
    "lcm" => math_lcm,
    "comb" => math_comb,
    "perm" => math_perm,
    "prod" => math_prod,
    "fsum" => math_fsum,
    "isclose" => math_isclose,
    "isfinite" => math_isfinite,
    "isinf" => math_isinf,
    "isnan" => math_isnan,
    "copysign" => math_copysign,
    "fmod" => math_fmod,
    "modf" => math_modf,
};

static RANDOM_FUNCTIONS: &[NativeFunction] = functions! {
    "seed" => random_seed,
    "random" => random_random,
    "uniform" => random_uniform,
    "randint" => random_randint,
    "randrange" => random_randrange,
    "choice" => random_choice,
    "shuffle" => random_shuffle,
    "sample" => random_sample,
};

static JSON_FUNCTIONS: &[NativeFunction] = functions! {
    "dumps" => json_dumps,
    "loads" => json_loads,
};

static TIME_FUNCTIONS: &[NativeFunction] = functions! {
    "time" => time_time,
    "monotonic" => time_monotonic,
    "perf_counter" => time_perf_counter,
    "sleep" => time_sleep,
};

fn module_attrs(kind: ModuleKind) -> Attrs {
    let mut attrs = Attrs::default();
    let functions = match kind {
        ModuleKind::Math => {
            attrs.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
            attrs.insert("e".to_string(), Value::Float(std::f64::consts::E));
            attrs.insert("tau".to_string(), Value::Float(std::f64::consts::TAU));
            attrs.insert("inf".to_string(), Value::Float(f64::INFINITY));
            attrs.insert("nan".to_string(), Value::Float(f64::NAN));
            MATH_FUNCTIONS
        }
        ModuleKind::Random => RANDOM_FUNCTIONS,
        ModuleKind::Json => JSON_FUNCTIONS,
        ModuleKind::Time => TIME_FUNCTIONS,
    };
    for native in functions {
        attrs.insert(native.name.to_string(), Value::Builtin(native));
    }
    attrs
}

impl Interpreter {
    /// `import name`. Each module is created once per run.
    pub(crate) fn import_module(&mut self, name: &str) -> Exec<Value> {
        let Some(kind) = self.namespace.module(name) else {
            debug!(module = name, "import of unavailable module");
            return fail(
                ExceptionKind::ModuleNotFoundError,
                format!("No module named '{}'", name),
            );
        };
        let module = self
            .modules
            .entry(kind)
            .or_insert_with(|| {
                Rc::new(Module {
                    kind,
                    attrs: RefCell::new(module_attrs(kind)),
                })
            })
            .clone();
        Ok(Value::Module(module))
    }
}

// math

fn number(value: &Value) -> Exec<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::Bool(b) => Ok(*b as i64 as f64),
        other => type_error(format!("must be real number, not {}", other.type_name())),
    }
}

fn integer(value: &Value) -> Exec<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        other => type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        )),
    }
}

fn domain_error<T>() -> Exec<T> {
    value_error("math domain error")
}

/// A float result, checked the way the C math library reports errors.
fn checked(input: &[f64], result: f64) -> Exec<Value> {
    if result.is_nan() && !input.iter().any(|x| x.is_nan()) {
        return domain_error();
    }
    if result.is_infinite() && input.iter().all(|x| x.is_finite()) {
        return fail(ExceptionKind::OverflowError, "math range error");
    }
    Ok(Value::Float(result))
}

fn unary(args: CallArgs, name: &str, f: fn(f64) -> f64) -> Exec<Value> {
    let [x] = args.exact(name)?;
    let x = number(&x)?;
    checked(&[x], f(x))
}

fn math_sqrt(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "sqrt", f64::sqrt)
}

fn math_isqrt(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [n] = args.exact("isqrt")?;
    let n = integer(&n)?;
    if n < 0 {
        return value_error("isqrt() argument must be nonnegative");
    }
    let mut root = (n as f64).sqrt() as i64;
    while root.checked_mul(root).map_or(true, |square| square > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).is_some_and(|square| square <= n) {
        root += 1;
    }
    Ok(Value::Int(root))
}

fn rounding(args: CallArgs, name: &str, f: fn(f64) -> f64) -> Exec<Value> {
    let [x] = args.exact(name)?;
    match x {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        other => Ok(Value::Int(float_to_int(f(number(&other)?))?)),
    }
}

fn math_floor(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    rounding(args, "floor", f64::floor)
}

fn math_ceil(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    rounding(args, "ceil", f64::ceil)
}

fn math_trunc(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    rounding(args, "trunc", f64::trunc)
}

fn math_fabs(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "fabs", f64::abs)
}

fn math_pow(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [x, y] = args.exact("pow")?;
    let (x, y) = (number(&x)?, number(&y)?);
    if x == 0.0 && y < 0.0 {
        return domain_error();
    }
    checked(&[x, y], x.powf(y))
}

fn math_exp(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "exp", f64::exp)
}

fn log_of(x: f64) -> Exec<f64> {
    if x <= 0.0 {
        return domain_error();
    }
    Ok(x.ln())
}

fn math_log(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let values = args.between("log", 1, 2)?;
    let x = log_of(number(&values[0])?)?;
    match values.get(1) {
        None => Ok(Value::Float(x)),
        Some(base) => {
            let base = log_of(number(base)?)?;
            if base == 0.0 {
                return fail(ExceptionKind::ZeroDivisionError, "float division by zero");
            }
            Ok(Value::Float(x / base))
        }
    }
}

fn math_log2(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [x] = args.exact("log2")?;
    let x = number(&x)?;
    log_of(x)?;
    Ok(Value::Float(x.log2()))
}

fn math_log10(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [x] = args.exact("log10")?;
    let x = number(&x)?;
    log_of(x)?;
    Ok(Value::Float(x.log10()))
}

fn math_sin(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "sin", f64::sin)
}

fn math_cos(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "cos", f64::cos)
}

fn math_tan(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "tan", f64::tan)
}

fn math_asin(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "asin", f64::asin)
}

fn math_acos(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "acos", f64::acos)
}

fn math_atan(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "atan", f64::atan)
}

fn math_atan2(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [y, x] = args.exact("atan2")?;
    Ok(Value::Float(number(&y)?.atan2(number(&x)?)))
}

fn math_hypot(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.no_keywords("hypot")?;
    let mut total = 0.0_f64;
    for value in &args.positional {
        total = total.hypot(number(value)?);
    }
    Ok(Value::Float(total))
}

fn math_degrees(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "degrees", f64::to_degrees)
}

fn math_radians(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    unary(args, "radians", f64::to_radians)
}

fn overflow_error() -> Interrupt {
    Interrupt::error(ExceptionKind::OverflowError, "integer overflow")
}

fn math_factorial(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [n] = args.exact("factorial")?;
    let n = integer(&n)?;
    if n < 0 {
        return value_error("factorial() not defined for negative values");
    }
    let mut result: i64 = 1;
    for k in 2..=n {
        interp.checkpoint()?;
        result = result.checked_mul(k).ok_or_else(overflow_error)?;
    }
    Ok(Value::Int(result))
}

fn gcd(a: i64, b: i64) -> Exec<i64> {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    i64::try_from(a).map_err(|_| overflow_error())
}

fn math_gcd(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.no_keywords("gcd")?;
    let mut result = 0;
    for value in &args.positional {
        result = gcd(result, integer(value)?)?;
    }
    Ok(Value::Int(result))
}

fn math_lcm(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.no_keywords("lcm")?;
    let mut result: i64 = 1;
    for value in &args.positional {
        let n = integer(value)?;
        if n == 0 || result == 0 {
            result = 0;
            continue;
        }
        let divisor = gcd(result, n)?;
        result = (result / divisor)
            .checked_mul(n)
            .and_then(i64::checked_abs)
            .ok_or_else(overflow_error)?;
    }
    Ok(Value::Int(result))
}

fn combinations(n: i64, k: i64, ordered: bool) -> Exec<i64> {
    if n < 0 {
        return value_error("n must be a non-negative integer");
    }
    if k < 0 {
        return value_error("k must be a non-negative integer");
    }
    if k > n {
        return Ok(0);
    }
    let k = if ordered { k } else { k.min(n - k) };
    let mut result: i128 = 1;
    for i in 0..k {
        result *= (n - i) as i128;
        if !ordered {
            result /= (i + 1) as i128;
        }
        if result > i64::MAX as i128 {
            return Err(overflow_error());
        }
    }
    Ok(result as i64)
}

fn math_comb(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [n, k] = args.exact("comb")?;
    Ok(Value::Int(combinations(integer(&n)?, integer(&k)?, false)?))
}

fn math_perm(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let values = args.between("perm", 1, 2)?;
    let n = integer(&values[0])?;
    let k = match values.get(1) {
        None | Some(Value::None) => n,
        Some(k) => integer(k)?,
    };
    Ok(Value::Int(combinations(n, k, true)?))
}

fn math_prod(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let start = args.take_keyword("start").unwrap_or(Value::Int(1));
    let [iterable] = args.exact("prod")?;
    let mut total = start;
    for item in interp.collect(&iterable)? {
        total = interp.binary(BinOp::Mul, &total, &item)?;
    }
    Ok(total)
}

fn math_fsum(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [iterable] = args.exact("fsum")?;
    // Shewchuk's exact partial sums.
    let mut partials: Vec<f64> = Vec::new();
    for item in interp.collect(&iterable)? {
        let mut x = number(&item)?;
        let mut kept = 0;
        for i in 0..partials.len() {
            let mut y = partials[i];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let high = x + y;
            let low = y - (high - x);
            if low != 0.0 {
                partials[kept] = low;
                kept += 1;
            }
            x = high;
        }
        partials.truncate(kept);
        partials.push(x);
    }
    Ok(Value::Float(partials.iter().sum()))
}

fn math_isclose(_: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let rel_tol = match args.take_keyword("rel_tol") {
        Some(value) => number(&value)?,
        None => 1e-9,
    };
    let abs_tol = match args.take_keyword("abs_tol") {
        Some(value) => number(&value)?,
        None => 0.0,
    };
    let [a, b] = args.exact("isclose")?;
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return value_error("tolerances must be non-negative");
    }
    let (a, b) = (number(&a)?, number(&b)?);
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol,
    ))
}

fn predicate(args: CallArgs, name: &str, f: fn(f64) -> bool) -> Exec<Value> {
    let [x] = args.exact(name)?;
    Ok(Value::Bool(f(number(&x)?)))
}

fn math_isfinite(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    predicate(args, "isfinite", f64::is_finite)
}

fn math_isinf(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    predicate(args, "isinf", f64::is_infinite)
}

fn math_isnan(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    predicate(args, "isnan", f64::is_nan)
}

fn math_copysign(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [x, y] = args.exact("copysign")?;
    Ok(Value::Float(number(&x)?.copysign(number(&y)?)))
}

fn math_fmod(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [x, y] = args.exact("fmod")?;
    let (x, y) = (number(&x)?, number(&y)?);
    if y == 0.0 || x.is_infinite() {
        return domain_error();
    }
    Ok(Value::Float(x % y))
}

fn math_modf(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [x] = args.exact("modf")?;
    let x = number(&x)?;
    Ok(Value::tuple(vec![
        Value::Float(x.fract().copysign(x)),
        Value::Float(x.trunc()),
    ]))
}

// random

fn random_seed(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let values = args.between("seed", 0, 1)?;
    let seed = match values.first() {
        None | Some(Value::None) => interp.namespace.random_seed(),
        Some(Value::Int(i)) => *i as u64,
        Some(Value::Bool(b)) => *b as u64,
        Some(Value::Float(f)) => f.to_bits(),
        Some(Value::Str(text)) => {
            let digest = blake3::hash(text.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest.as_bytes()[..8]);
            u64::from_le_bytes(bytes)
        }
        Some(other) => {
            return type_error(format!(
                "The only supported seed types are: None, int, float, str, bytes, and bytearray. not {}",
                other.type_name()
            ))
        }
    };
    interp.rng = StdRng::seed_from_u64(seed);
    Ok(Value::None)
}

fn random_random(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("random")?;
    Ok(Value::Float(interp.rng.gen::<f64>()))
}

fn random_uniform(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [a, b] = args.exact("uniform")?;
    let (a, b) = (number(&a)?, number(&b)?);
    Ok(Value::Float(a + (b - a) * interp.rng.gen::<f64>()))
}

fn random_randint(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [a, b] = args.exact("randint")?;
    let (a, b) = (integer(&a)?, integer(&b)?);
    if a > b {
        return value_error(format!("empty range in randrange({}, {})", a, b + 1));
    }
    Ok(Value::Int(interp.rng.gen_range(a..=b)))
}

fn random_randrange(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let values = args.between("randrange", 1, 3)?;
    let mut bounds = Vec::with_capacity(values.len());
    for value in &values {
        bounds.push(integer(value)?);
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return type_error("randrange expected at most 3 arguments"),
    };
    if step == 0 {
        return value_error("zero step for randrange()");
    }
    let span = stop as i128 - start as i128;
    let count = if step > 0 {
        (span + step as i128 - 1) / step as i128
    } else {
        (span + step as i128 + 1) / step as i128
    };
    if count <= 0 {
        return value_error(format!("empty range in randrange({}, {})", start, stop));
    }
    let pick = interp.rng.gen_range(0..count);
    Ok(Value::Int((start as i128 + pick * step as i128) as i64))
}

fn random_choice(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [sequence] = args.exact("choice")?;
    let items = match &sequence {
        Value::Dict(_) | Value::Set(_) => {
            return type_error(format!("'{}' object is not subscriptable", sequence.type_name()))
        }
        other => interp.collect(other)?,
    };
    match items.choose(&mut interp.rng) {
        Some(item) => Ok(item.clone()),
        None => fail(ExceptionKind::IndexError, "Cannot choose from an empty sequence"),
    }
}

fn random_shuffle(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [list] = args.exact("shuffle")?;
    let Value::List(items) = &list else {
        return type_error(format!("'{}' object does not support item assignment", list.type_name()));
    };
    items.borrow_mut().shuffle(&mut interp.rng);
    Ok(Value::None)
}

fn random_sample(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let k = args.take_keyword("k");
    let mut values = args.between("sample", 1, 2)?;
    let k = if values.len() == 2 { values.pop() } else { k };
    let Some(k) = k else {
        return type_error("sample() missing 1 required positional argument: 'k'");
    };
    let population = match &values[0] {
        Value::Dict(_) | Value::Set(_) => {
            return type_error("Population must be a sequence.  For dicts or sets, use sorted(d).")
        }
        other => interp.collect(other)?,
    };
    let k = integer(&k)?;
    if k < 0 || k as usize > population.len() {
        return value_error("Sample larger than population or is negative");
    }
    let picked = population
        .choose_multiple(&mut interp.rng, k as usize)
        .cloned()
        .collect();
    Ok(Value::list(picked))
}

// json

fn json_dumps(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    json::dumps(interp, args)
}

fn json_loads(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    json::loads(interp, args)
}

// time

fn time_time(_: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("time")?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Float(now))
}

fn time_monotonic(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("monotonic")?;
    Ok(Value::Float(interp.elapsed_secs()))
}

fn time_perf_counter(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("perf_counter")?;
    Ok(Value::Float(interp.elapsed_secs()))
}

/// `time.sleep(secs)`, woken early when the run is cancelled.
fn time_sleep(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [secs] = args.exact("sleep")?;
    let secs = number(&secs)?;
    if secs.is_nan() {
        return value_error("Invalid value NaN (not a number)");
    }
    if secs < 0.0 {
        return value_error("sleep length must be non-negative");
    }
    let duration = Duration::try_from_secs_f64(secs).unwrap_or(MAX_SLEEP).min(MAX_SLEEP);
    if interp.cancel.wait_timeout(duration) {
        return Err(Interrupt::Cancelled);
    }
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};

    #[test]
    fn test_math_module() {
        let source = "\
import math
print(math.sqrt(16), math.floor(-2.5), math.ceil(2.1), math.trunc(-2.7), math.isqrt(17))
print(math.factorial(5), math.gcd(12, 18), math.lcm(4, 6), math.comb(5, 2), math.perm(5, 2))
print(round(math.pi, 5), math.log(math.e), math.log(8, 2), math.log10(1000), math.hypot(3, 4))
print(math.fsum([0.1] * 10), math.prod([1, 2, 3, 4]), math.isclose(0.1 + 0.2, 0.3), math.fabs(-3))
print(math.inf > 10 ** 18, math.isnan(math.nan), math.copysign(2, -0.0), math.modf(2.5))
";
        assert_eq!(
            output(source),
            "4.0 -3 3 -2 4\n120 6 12 10 20\n3.14159 1.0 3.0 3.0 5.0\n1.0 24 True 3.0\nTrue True -2.0 (0.5, 2.0)\n"
        );
    }

    #[test]
    fn test_math_errors() {
        assert_eq!(fault("import math\nmath.sqrt(-1)"), "ValueError: math domain error");
        assert_eq!(fault("import math\nmath.log(0)"), "ValueError: math domain error");
        assert_eq!(
            fault("import math\nmath.factorial(-1)"),
            "ValueError: factorial() not defined for negative values"
        );
        assert_eq!(fault("import math\nmath.factorial(30)"), "OverflowError: integer overflow");
        assert_eq!(fault("import math\nmath.exp(1000)"), "OverflowError: math range error");
        let min = "(-9223372036854775807 - 1)";
        assert_eq!(fault(&format!("import math\nmath.gcd({}, 0)", min)), "OverflowError: integer overflow");
        assert_eq!(fault(&format!("import math\nmath.gcd({0}, {0})", min)), "OverflowError: integer overflow");
        assert_eq!(fault(&format!("import math\nmath.lcm({}, 1)", min)), "OverflowError: integer overflow");
        assert_eq!(
            output(&format!("import math\nprint(math.gcd({}, 6), math.gcd(-4, 0), math.lcm(-4, 6))", min)),
            "2 4 12\n"
        );
        assert_eq!(
            fault("import math\nmath.floor(float('inf'))"),
            "OverflowError: cannot convert float infinity to integer"
        );
    }

    #[test]
    fn test_random_is_reproducible_per_seed() {
        let source = "\
import random
random.seed(7)
first = [random.randint(1, 100) for _ in range(5)]
random.seed(7)
second = [random.randint(1, 100) for _ in range(5)]
print(first == second, all(1 <= n <= 100 for n in first))
xs = list(range(10))
random.shuffle(xs)
print(sorted(xs) == list(range(10)), random.choice('abc') in 'abc', len(random.sample(xs, 3)))
r = random.random()
print(0 <= r < 1, random.randrange(0, 10, 5) in (0, 5), 2 <= random.uniform(2, 3) <= 3)
";
        assert_eq!(output(source), "True True\nTrue True 3\nTrue True True\n");
        assert_eq!(
            fault("import random\nrandom.choice([])"),
            "IndexError: Cannot choose from an empty sequence"
        );
        assert_eq!(
            fault("import random\nrandom.randint(5, 1)"),
            "ValueError: empty range in randrange(5, 2)"
        );
    }

    #[test]
    fn test_same_seed_same_sequence_across_runs() {
        let source = "import random\nprint([random.randint(0, 1000) for _ in range(8)])";
        assert_eq!(output(source), output(source));
    }

    #[test]
    fn test_time_module() {
        let source = "\
import time
start = time.perf_counter()
time.sleep(0.01)
elapsed = time.perf_counter() - start
print(elapsed >= 0.005, time.time() > 1.6e9, time.monotonic() >= 0)
";
        assert_eq!(output(source), "True True True\n");
        assert_eq!(
            fault("import time\ntime.sleep(-1)"),
            "ValueError: sleep length must be non-negative"
        );
    }

    #[test]
    fn test_module_repr_and_identity() {
        let source = "\
import math
import math as m
print(math, math is m, math.sqrt)
";
        assert_eq!(
            output(source),
            "<module 'math' (built-in)> True <built-in function sqrt>\n"
        );
    }
}

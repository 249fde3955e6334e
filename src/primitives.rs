use std::cmp::Ordering;
use std::path::Path;
use std::rc::Rc;

use crate::environment::{Environment, GlobalTable};
use crate::evaluator::{self, EvalError, EvalResult};
use crate::lexer::{NumberLiteral, TokenKind, tokenize};
use crate::ports::{InputPort, OutputPort};
use crate::types::{Arity, Native, Object, Pair, numbers_equal};

// --- Argument Helpers ---

#[derive(Debug, Clone, Copy)]
enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Float(n) => n,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Integer(n) => n == 0,
            Number::Float(n) => n == 0.0,
        }
    }

    fn into_object(self) -> Object {
        match self {
            Number::Integer(n) => Object::Integer(n),
            Number::Float(n) => Object::Float(n),
        }
    }
}

fn expect_number(native: &Native, value: &Object) -> EvalResult<Number> {
    match value {
        Object::Integer(n) => Ok(Number::Integer(*n)),
        Object::Float(n) => Ok(Number::Float(*n)),
        _ => Err(EvalError::wrong_type(native, value)),
    }
}

fn expect_integer(native: &Native, value: &Object) -> EvalResult<i64> {
    value
        .as_integer()
        .ok_or_else(|| EvalError::wrong_type(native, value))
}

fn expect_str<'a>(native: &Native, value: &'a Object) -> EvalResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| EvalError::wrong_type(native, value))
}

fn expect_pair<'a>(native: &Native, value: &'a Object) -> EvalResult<&'a Rc<Pair>> {
    value
        .as_pair()
        .ok_or_else(|| EvalError::wrong_type(native, value))
}

fn expect_list(native: &Native, value: &Object) -> EvalResult<Vec<Object>> {
    value
        .to_vec()
        .ok_or_else(|| EvalError::wrong_type(native, value))
}

fn expect_input_port<'a>(native: &Native, value: &'a Object) -> EvalResult<&'a InputPort> {
    match value {
        Object::InputPort(port) if port.is_open() => Ok(port.as_ref()),
        Object::InputPort(port) => Err(EvalError::Runtime(format!(
            "'{}': port {} is closed",
            native.name(),
            port.name()
        ))),
        _ => Err(EvalError::wrong_type(native, value)),
    }
}

// The trailing optional port of `display`, `write`, `write-char` and `newline`.
fn optional_output_port(
    native: &Native,
    env: &Environment,
    args: &[Object],
    fixed: usize,
) -> EvalResult<Rc<OutputPort>> {
    match args.get(fixed..).unwrap_or_default() {
        [] => Ok(env.globals().output()),
        [Object::OutputPort(port)] => Ok(Rc::clone(port)),
        [other] => Err(EvalError::wrong_type(native, other)),
        _ => Err(EvalError::WrongNumberArguments {
            name: native.name().to_string(),
            expected: Arity::exactly(fixed + 1),
            got: args.len(),
        }),
    }
}

fn write_to(port: &OutputPort, text: &str) -> EvalResult<()> {
    port.write_str(text)
        .map_err(|e| EvalError::Runtime(format!("cannot write to {}: {}", port.name(), e)))
}

fn overflow(native: &Native) -> EvalError {
    EvalError::Runtime(format!("integer overflow in '{}'", native.name()))
}

fn division_by_zero(native: &Native) -> EvalError {
    EvalError::Runtime(format!("division by zero in '{}'", native.name()))
}

// --- Type Predicates ---

macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
            let [value] = native.fixed_args(args)?;
            Ok(Object::Boolean(matches!(value, $pattern)))
        }
    };
}

type_predicate!(prim_is_null, Object::EmptyList);
type_predicate!(prim_is_boolean, Object::Boolean(_));
type_predicate!(prim_is_symbol, Object::Symbol(_));
type_predicate!(prim_is_integer, Object::Integer(_));
type_predicate!(prim_is_float, Object::Float(_));
type_predicate!(prim_is_number, Object::Integer(_) | Object::Float(_));
type_predicate!(prim_is_char, Object::Character(_));
type_predicate!(prim_is_string, Object::String(_));
type_predicate!(prim_is_pair, Object::Pair(_));
type_predicate!(prim_is_procedure, Object::Procedure(_) | Object::Closure(_));

fn prim_is_list(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (list? '(1 2)) -> #t, (list? '(1 . 2)) -> #f
    let [value] = native.fixed_args(args)?;
    Ok(Object::Boolean(value.to_vec().is_some()))
}

// --- Arithmetic ---

// Two Integers stay exact (overflow is an error); anything else is Float.
fn combine(
    native: &Native,
    left: Number,
    right: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Number> {
    match (left, right) {
        (Number::Integer(a), Number::Integer(b)) => int_op(a, b)
            .map(Number::Integer)
            .ok_or_else(|| overflow(native)),
        _ => Ok(Number::Float(float_op(left.as_f64(), right.as_f64()))),
    }
}

fn fold_numbers(
    native: &Native,
    args: &[Object],
    start: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult {
    args.iter()
        .try_fold(start, |acc, arg| {
            combine(native, acc, expect_number(native, arg)?, int_op, float_op)
        })
        .map(Number::into_object)
}

fn prim_add(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (+) -> 0
    // (+ 1 2 3) -> 6
    fold_numbers(native, &args, Number::Integer(0), i64::checked_add, |a, b| a + b)
}

fn prim_sub(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (- x) -> -x
    // (- x y z) -> x - y - z
    match args.split_first() {
        Some((only, [])) => match expect_number(native, only)? {
            Number::Integer(n) => n
                .checked_neg()
                .map(Object::Integer)
                .ok_or_else(|| overflow(native)),
            Number::Float(n) => Ok(Object::Float(-n)),
        },
        Some((first, rest)) => fold_numbers(
            native,
            rest,
            expect_number(native, first)?,
            i64::checked_sub,
            |a, b| a - b,
        ),
        None => Err(EvalError::Internal("'-' called without arguments".to_string())),
    }
}

fn prim_mul(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (*) -> 1
    // (* 1 2 3) -> 6
    fold_numbers(native, &args, Number::Integer(1), i64::checked_mul, |a, b| a * b)
}

fn divide(native: &Native, left: Number, right: Number) -> EvalResult<Number> {
    if right.is_zero() {
        return Err(division_by_zero(native));
    }
    match (left, right) {
        (Number::Integer(a), Number::Integer(b)) if a.checked_rem(b) == Some(0) => a
            .checked_div(b)
            .map(Number::Integer)
            .ok_or_else(|| overflow(native)),
        _ => Ok(Number::Float(left.as_f64() / right.as_f64())),
    }
}

fn prim_div(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (/ 2) -> 0.5
    // (/ 12 3) -> 4, (/ 10 4) -> 2.5
    let (first, rest) = match args.split_first() {
        Some((only, [])) => (Number::Integer(1), std::slice::from_ref(only)),
        Some((first, rest)) => (expect_number(native, first)?, rest),
        None => return Err(EvalError::Internal("'/' called without arguments".to_string())),
    };
    rest.iter()
        .try_fold(first, |acc, arg| divide(native, acc, expect_number(native, arg)?))
        .map(Number::into_object)
}

fn prim_mod(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (mod -7 2) -> 1: the result takes the sign of the divisor
    let [dividend, divisor] = native.fixed_args(args)?;
    let a = expect_integer(native, &dividend)?;
    let b = expect_integer(native, &divisor)?;
    if b == 0 {
        return Err(division_by_zero(native));
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Ok(Object::Integer(remainder + b))
    } else {
        Ok(Object::Integer(remainder))
    }
}

fn prim_abs(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    match expect_number(native, &value)? {
        Number::Integer(n) => n
            .checked_abs()
            .map(Object::Integer)
            .ok_or_else(|| overflow(native)),
        Number::Float(n) => Ok(Object::Float(n.abs())),
    }
}

// --- Comparison ---

fn compare(left: Number, right: Number) -> Option<Ordering> {
    match (left, right) {
        (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(&b)),
        _ => left.as_f64().partial_cmp(&right.as_f64()),
    }
}

// (< 1 2 3) -> #t: every adjacent pair must satisfy `accept`.
fn compare_numbers(native: &Native, args: &[Object], accept: fn(Ordering) -> bool) -> EvalResult {
    let numbers = args
        .iter()
        .map(|arg| expect_number(native, arg))
        .collect::<EvalResult<Vec<Number>>>()?;
    let holds = numbers
        .windows(2)
        .all(|pair| compare(pair[0], pair[1]).is_some_and(accept));
    Ok(Object::Boolean(holds))
}

fn prim_equals(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    for arg in &args {
        expect_number(native, arg)?;
    }
    let holds = args.windows(2).all(|pair| numbers_equal(&pair[0], &pair[1]));
    Ok(Object::Boolean(holds))
}

fn prim_not_equals(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [left, right] = native.fixed_args(args)?;
    expect_number(native, &left)?;
    expect_number(native, &right)?;
    Ok(Object::Boolean(!numbers_equal(&left, &right)))
}

fn prim_less_than(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    compare_numbers(native, &args, Ordering::is_lt)
}

fn prim_greater_than(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    compare_numbers(native, &args, Ordering::is_gt)
}

fn prim_less_than_or_equals(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    compare_numbers(native, &args, Ordering::is_le)
}

fn prim_greater_than_or_equals(
    _env: &Environment,
    args: Vec<Object>,
    native: &Native,
) -> EvalResult {
    compare_numbers(native, &args, Ordering::is_ge)
}

// --- List Primitives ---

fn prim_cons(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (cons 1 '(2)) -> (1 2), (cons 1 2) -> (1 . 2)
    let [car, cdr] = native.fixed_args(args)?;
    Ok(Object::cons(car, cdr))
}

fn prim_car(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    Ok(expect_pair(native, &value)?.car())
}

fn prim_cdr(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    Ok(expect_pair(native, &value)?.cdr())
}

fn prim_set_car(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [target, value] = native.fixed_args(args)?;
    expect_pair(native, &target)?.set_car(value);
    Ok(Object::Undefined)
}

fn prim_set_cdr(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [target, value] = native.fixed_args(args)?;
    expect_pair(native, &target)?.set_cdr(value);
    Ok(Object::Undefined)
}

fn prim_list(_env: &Environment, args: Vec<Object>, _native: &Native) -> EvalResult {
    Ok(Object::list(args))
}

fn prim_length(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [list] = native.fixed_args(args)?;
    let length = expect_list(native, &list)?.len();
    i64::try_from(length)
        .map(Object::Integer)
        .map_err(|_| overflow(native))
}

fn prim_nth(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (nth 1 '(a b c)) -> b
    let [index, list] = native.fixed_args(args)?;
    let index = expect_integer(native, &index)?;
    let items = expect_list(native, &list)?;
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i).cloned())
        .ok_or_else(|| {
            EvalError::Runtime(format!(
                "index {} out of range for list of length {}",
                index,
                items.len()
            ))
        })
}

// --- Equality ---

fn prim_eq(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [left, right] = native.fixed_args(args)?;
    Ok(Object::Boolean(left.is_eq(&right)))
}

fn prim_equal(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [left, right] = native.fixed_args(args)?;
    Ok(Object::Boolean(left.is_equal(&right)))
}

fn prim_not(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    Ok(Object::Boolean(!value.is_true()))
}

// --- Conversion ---

fn prim_char_to_integer(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    match value {
        Object::Character(c) => Ok(Object::Integer(i64::from(u32::from(c)))),
        other => Err(EvalError::wrong_type(native, &other)),
    }
}

fn prim_integer_to_char(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    let code = expect_integer(native, &value)?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(Object::Character)
        .ok_or_else(|| EvalError::Runtime(format!("{} is not a valid character code", code)))
}

fn prim_number_to_string(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    let number = expect_number(native, &value)?.into_object();
    Ok(Object::string(&number.to_string()))
}

// Accepts exactly one numeric token covering the whole text.
fn prim_string_to_number(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    let text = expect_str(native, &value)?;
    let number = match tokenize(text).as_deref() {
        Ok([token]) if token.span.to_range() == (0..text.len()) => match token.kind {
            TokenKind::Number(NumberLiteral::Integer(n)) => Object::Integer(n),
            TokenKind::Number(NumberLiteral::Float(n)) => Object::Float(n),
            _ => Object::Boolean(false),
        },
        _ => Object::Boolean(false),
    };
    Ok(number)
}

fn prim_symbol_to_string(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    match value {
        Object::Symbol(symbol) => Ok(Object::string(symbol.name())),
        other => Err(EvalError::wrong_type(native, &other)),
    }
}

fn prim_string_to_symbol(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    Ok(Object::Symbol(env.intern(expect_str(native, &value)?)))
}

fn prim_string_length(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [value] = native.fixed_args(args)?;
    let length = expect_str(native, &value)?.chars().count();
    i64::try_from(length)
        .map(Object::Integer)
        .map_err(|_| overflow(native))
}

fn prim_string_append(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let mut result = String::new();
    for arg in &args {
        result.push_str(expect_str(native, arg)?);
    }
    Ok(Object::string(&result))
}

// --- Reflection ---

fn prim_eval(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (eval '(+ 1 2)) -> 3, (eval 'x (environment)) -> x in that environment
    match args.as_slice() {
        [expr] => evaluator::evaluate(expr, env),
        [expr, Object::Environment(target)] => evaluator::evaluate(expr, target),
        [_, other] => Err(EvalError::wrong_type(native, other)),
        _ => Err(EvalError::WrongNumberArguments {
            name: native.name().to_string(),
            expected: Arity::exactly(2),
            got: args.len(),
        }),
    }
}

fn prim_apply(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    // (apply + 1 2 '(3 4)) -> 10
    let Some((procedure, rest)) = args.split_first() else {
        return Err(EvalError::Internal("apply called without arguments".to_string()));
    };
    let Some((list, spread)) = rest.split_last() else {
        return Err(EvalError::Internal("apply called without a list".to_string()));
    };
    if !procedure.is_applicable() {
        return Err(EvalError::wrong_type(native, procedure));
    }
    let mut arguments = spread.to_vec();
    arguments.extend(expect_list(native, list)?);
    evaluator::apply(procedure, arguments, env)
}

fn prim_environment(env: &Environment, _args: Vec<Object>, _native: &Native) -> EvalResult {
    Ok(Object::Environment(env.clone()))
}

fn prim_load(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [path] = native.fixed_args(args)?;
    evaluator::evaluate_file(Path::new(expect_str(native, &path)?), env)?;
    Ok(Object::Undefined)
}

fn prim_error(_env: &Environment, args: Vec<Object>, _native: &Native) -> EvalResult {
    // (error "bad value:" 42) fails with "bad value: 42"
    let message = args
        .iter()
        .map(|arg| arg.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    Err(EvalError::Runtime(message))
}

// --- Ports ---

fn prim_open_input_file(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [path] = native.fixed_args(args)?;
    let path = expect_str(native, &path)?;
    InputPort::open_file(Path::new(path))
        .map(|port| Object::InputPort(Rc::new(port)))
        .map_err(|e| EvalError::Runtime(format!("cannot open {}: {}", path, e)))
}

fn prim_open_output_file(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [path] = native.fixed_args(args)?;
    let path = expect_str(native, &path)?;
    OutputPort::create_file(Path::new(path))
        .map(|port| Object::OutputPort(Rc::new(port)))
        .map_err(|e| EvalError::Runtime(format!("cannot create {}: {}", path, e)))
}

fn prim_open_output_string(_env: &Environment, _args: Vec<Object>, _native: &Native) -> EvalResult {
    Ok(Object::OutputPort(Rc::new(OutputPort::string())))
}

fn prim_get_output_string(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [port] = native.fixed_args(args)?;
    match &port {
        Object::OutputPort(output) => output
            .contents()
            .map(|text| Object::string(&text))
            .ok_or_else(|| EvalError::wrong_type(native, &port)),
        other => Err(EvalError::wrong_type(native, other)),
    }
}

fn prim_close_input_port(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [port] = native.fixed_args(args)?;
    match port {
        Object::InputPort(input) => {
            input.close();
            Ok(Object::Undefined)
        }
        other => Err(EvalError::wrong_type(native, &other)),
    }
}

fn prim_close_output_port(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [port] = native.fixed_args(args)?;
    match port {
        Object::OutputPort(output) => output
            .close()
            .map(|()| Object::Undefined)
            .map_err(|e| EvalError::Runtime(format!("cannot close {}: {}", output.name(), e))),
        other => Err(EvalError::wrong_type(native, &other)),
    }
}

// `read`, `read-char` and `peek-char` answer Undefined at end of input.
fn prim_read(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [port] = native.fixed_args(args)?;
    let datum = expect_input_port(native, &port)?.read(env.globals())?;
    Ok(datum.unwrap_or(Object::Undefined))
}

fn prim_read_char(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [port] = native.fixed_args(args)?;
    let c = expect_input_port(native, &port)?.read_char();
    Ok(c.map_or(Object::Undefined, Object::Character))
}

fn prim_peek_char(_env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let [port] = native.fixed_args(args)?;
    let c = expect_input_port(native, &port)?.peek_char();
    Ok(c.map_or(Object::Undefined, Object::Character))
}

fn prim_write(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let port = optional_output_port(native, env, &args, 1)?;
    write_to(&port, &args[0].to_string())?;
    Ok(Object::Undefined)
}

fn prim_display(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let port = optional_output_port(native, env, &args, 1)?;
    write_to(&port, &args[0].display().to_string())?;
    Ok(Object::Undefined)
}

fn prim_write_char(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let port = optional_output_port(native, env, &args, 1)?;
    match &args[0] {
        Object::Character(c) => write_to(&port, c.encode_utf8(&mut [0; 4]))?,
        other => return Err(EvalError::wrong_type(native, other)),
    }
    Ok(Object::Undefined)
}

fn prim_newline(env: &Environment, args: Vec<Object>, native: &Native) -> EvalResult {
    let port = optional_output_port(native, env, &args, 0)?;
    write_to(&port, "\n")?;
    Ok(Object::Undefined)
}

fn prim_current_output_port(env: &Environment, _args: Vec<Object>, _native: &Native) -> EvalResult {
    Ok(Object::OutputPort(env.globals().output()))
}

/// Installs the native procedure library into the global table.
pub fn install(globals: &GlobalTable) {
    let exactly = Arity::exactly;
    let at_least = Arity::at_least;

    globals.install_native_procedure("null?", exactly(1), prim_is_null);
    globals.install_native_procedure("boolean?", exactly(1), prim_is_boolean);
    globals.install_native_procedure("symbol?", exactly(1), prim_is_symbol);
    globals.install_native_procedure("integer?", exactly(1), prim_is_integer);
    globals.install_native_procedure("float?", exactly(1), prim_is_float);
    globals.install_native_procedure("number?", exactly(1), prim_is_number);
    globals.install_native_procedure("char?", exactly(1), prim_is_char);
    globals.install_native_procedure("string?", exactly(1), prim_is_string);
    globals.install_native_procedure("pair?", exactly(1), prim_is_pair);
    globals.install_native_procedure("list?", exactly(1), prim_is_list);
    globals.install_native_procedure("procedure?", exactly(1), prim_is_procedure);

    globals.install_native_procedure("+", at_least(0), prim_add);
    globals.install_native_procedure("-", at_least(1), prim_sub);
    globals.install_native_procedure("*", at_least(0), prim_mul);
    globals.install_native_procedure("/", at_least(1), prim_div);
    globals.install_native_procedure("mod", exactly(2), prim_mod);
    globals.install_native_procedure("abs", exactly(1), prim_abs);

    globals.install_native_procedure("=", at_least(2), prim_equals);
    globals.install_native_procedure("/=", exactly(2), prim_not_equals);
    globals.install_native_procedure("<", at_least(2), prim_less_than);
    globals.install_native_procedure(">", at_least(2), prim_greater_than);
    globals.install_native_procedure("<=", at_least(2), prim_less_than_or_equals);
    globals.install_native_procedure(">=", at_least(2), prim_greater_than_or_equals);

    globals.install_native_procedure("cons", exactly(2), prim_cons);
    globals.install_native_procedure("car", exactly(1), prim_car);
    globals.install_native_procedure("cdr", exactly(1), prim_cdr);
    globals.install_native_procedure("set-car!", exactly(2), prim_set_car);
    globals.install_native_procedure("set-cdr!", exactly(2), prim_set_cdr);
    globals.install_native_procedure("list", at_least(0), prim_list);
    globals.install_native_procedure("length", exactly(1), prim_length);
    globals.install_native_procedure("nth", exactly(2), prim_nth);

    globals.install_native_procedure("eq?", exactly(2), prim_eq);
    globals.install_native_procedure("equal?", exactly(2), prim_equal);
    globals.install_native_procedure("not", exactly(1), prim_not);

    globals.install_native_procedure("char->integer", exactly(1), prim_char_to_integer);
    globals.install_native_procedure("integer->char", exactly(1), prim_integer_to_char);
    globals.install_native_procedure("number->string", exactly(1), prim_number_to_string);
    globals.install_native_procedure("string->number", exactly(1), prim_string_to_number);
    globals.install_native_procedure("symbol->string", exactly(1), prim_symbol_to_string);
    globals.install_native_procedure("string->symbol", exactly(1), prim_string_to_symbol);
    globals.install_native_procedure("string-length", exactly(1), prim_string_length);
    globals.install_native_procedure("string-append", at_least(0), prim_string_append);

    globals.install_native_procedure("eval", at_least(1), prim_eval);
    globals.install_native_procedure("apply", at_least(2), prim_apply);
    globals.install_native_procedure("environment", exactly(0), prim_environment);
    globals.install_native_procedure("load", exactly(1), prim_load);
    globals.install_native_procedure("error", at_least(1), prim_error);

    globals.install_native_procedure("open-input-file", exactly(1), prim_open_input_file);
    globals.install_native_procedure("open-output-file", exactly(1), prim_open_output_file);
    globals.install_native_procedure("open-output-string", exactly(0), prim_open_output_string);
    globals.install_native_procedure("get-output-string", exactly(1), prim_get_output_string);
    globals.install_native_procedure("close-input-port", exactly(1), prim_close_input_port);
    globals.install_native_procedure("close-output-port", exactly(1), prim_close_output_port);
    globals.install_native_procedure("read", exactly(1), prim_read);
    globals.install_native_procedure("read-char", exactly(1), prim_read_char);
    globals.install_native_procedure("peek-char", exactly(1), prim_peek_char);
    globals.install_native_procedure("write", at_least(1), prim_write);
    globals.install_native_procedure("display", at_least(1), prim_display);
    globals.install_native_procedure("write-char", at_least(1), prim_write_char);
    globals.install_native_procedure("newline", at_least(0), prim_newline);
    globals.install_native_procedure("current-output-port", exactly(0), prim_current_output_port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;

    fn interpreter() -> Interpreter {
        Interpreter::with_output(Rc::new(OutputPort::string()))
    }

    fn assert_eval(input: &str, expected: &str) {
        match interpreter().eval_str(input) {
            Ok(result) => assert_eq!(result.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn assert_eval_error(input: &str, expected_error_variant: &EvalError) {
        match interpreter().eval_str(input) {
            Ok(result) => panic!(
                "Expected evaluation to fail for input '{}', but got: {:?}",
                input, result
            ),
            Err(e) => assert_eq!(
                std::mem::discriminant(&e),
                std::mem::discriminant(expected_error_variant),
                "Input: '{}', Expected error variant like {:?}, got: {:?}",
                input,
                expected_error_variant,
                e
            ),
        }
    }

    fn wrong_type() -> EvalError {
        EvalError::WrongTypeArgument {
            procedure: String::new(),
            value: String::new(),
        }
    }

    fn arity_error() -> EvalError {
        EvalError::WrongNumberArguments {
            name: String::new(),
            expected: Arity::exactly(0),
            got: 0,
        }
    }

    fn runtime_error() -> EvalError {
        EvalError::Runtime(String::new())
    }

    #[test]
    fn test_type_predicates() {
        assert_eval("(null? '())", "#t");
        assert_eval("(null? '(1))", "#f");
        assert_eval("(boolean? #f)", "#t");
        assert_eval("(symbol? 'a)", "#t");
        assert_eval("(symbol? \"a\")", "#f");
        assert_eval("(integer? 1)", "#t");
        assert_eval("(integer? 1.0)", "#f");
        assert_eval("(float? 1.0)", "#t");
        assert_eval("(number? 1.5)", "#t");
        assert_eval("(char? #\\a)", "#t");
        assert_eval("(string? \"s\")", "#t");
        assert_eval("(pair? '(1 . 2))", "#t");
        assert_eval("(pair? '())", "#f");
        assert_eval("(list? '(1 2))", "#t");
        assert_eval("(list? '())", "#t");
        assert_eval("(list? '(1 . 2))", "#f");
        assert_eval("(procedure? car)", "#t");
        assert_eval("(procedure? (lambda () 1))", "#t");
        assert_eval("(procedure? if)", "#f");
        assert_eval_error("(null?)", &arity_error());
    }

    #[test]
    fn test_arithmetic() {
        assert_eval("(+)", "0");
        assert_eval("(+ 1 2 3)", "6");
        assert_eval("(+ 1 2 3.0)", "6.0");
        assert_eval("(*)", "1");
        assert_eval("(* 2 3 4)", "24");
        assert_eval("(* 2 0.5)", "1.0");
        assert_eval("(- 5)", "-5");
        assert_eval("(- 2.5)", "-2.5");
        assert_eval("(- 10 1 2)", "7");
        assert_eval("(- 10 0.5)", "9.5");
        assert_eval_error("(+ 1 'a)", &wrong_type());
        assert_eval_error("(-)", &arity_error());
    }

    #[test]
    fn test_division() {
        assert_eval("(/ 2)", "0.5");
        assert_eval("(/ 1)", "1");
        assert_eval("(/ 12 3)", "4");
        assert_eval("(/ 12 3 2)", "2");
        assert_eval("(/ 10 4)", "2.5");
        assert_eval("(/ 10 2.5)", "4.0");
        assert_eval("(/ 10 4 2)", "1.25");
        assert_eval_error("(/ 0)", &runtime_error());
        assert_eval_error("(/ 1 0)", &runtime_error());
        assert_eval_error("(/ 1.5 0.0)", &runtime_error());
        assert_eval_error("(/)", &arity_error());
    }

    #[test]
    fn test_integer_overflow() {
        assert_eval_error("(+ 9223372036854775807 1)", &runtime_error());
        assert_eval_error("(* 9223372036854775807 2)", &runtime_error());
        assert_eval_error("(- -9223372036854775807 2)", &runtime_error());
        assert_eval("(+ 9223372036854775807 1.0)", "9.223372036854776e18");
    }

    #[test]
    fn test_mod_and_abs() {
        assert_eval("(mod 7 2)", "1");
        assert_eval("(mod -7 2)", "1");
        assert_eval("(mod 7 -2)", "-1");
        assert_eval("(mod 6 3)", "0");
        assert_eval_error("(mod 1 0)", &runtime_error());
        assert_eval_error("(mod 1.5 1)", &wrong_type());
        assert_eval("(abs -4)", "4");
        assert_eval("(abs -4.5)", "4.5");
    }

    #[test]
    fn test_comparison() {
        assert_eval("(= 1 1)", "#t");
        assert_eval("(= 1 1.0)", "#t");
        assert_eval("(= 1 1 2)", "#f");
        assert_eval("(= 0.3 (+ 0.1 0.2))", "#t");
        assert_eval("(/= 1 2)", "#t");
        assert_eval("(/= 1 1.0)", "#f");
        assert_eval("(< 1 2 3)", "#t");
        assert_eval("(< 1 3 2)", "#f");
        assert_eval("(> 3 2.5 1)", "#t");
        assert_eval("(<= 1 1 2)", "#t");
        assert_eval("(>= 2 2 3)", "#f");
        assert_eval_error("(< 1)", &arity_error());
        assert_eval_error("(= 1 'a)", &wrong_type());
        assert_eval_error("(/= 1 2 3)", &arity_error());
    }

    #[test]
    fn test_fixed_arity_natives() {
        assert_eval_error("(cons 1)", &arity_error());
        assert_eval_error("(cons 1 2 3)", &arity_error());
    }

    #[test]
    fn test_list_primitives() {
        assert_eval("(cons 1 2)", "(1 . 2)");
        assert_eval("(cons 1 '(2 3))", "(1 2 3)");
        assert_eval("(car '(1 2))", "1");
        assert_eval("(cdr '(1 2))", "(2)");
        assert_eval("(cdr '(1))", "()");
        assert_eval("(list)", "()");
        assert_eval("(list 1 (+ 1 1) 'c)", "(1 2 c)");
        assert_eval("(length '(1 2 3))", "3");
        assert_eval("(length '())", "0");
        assert_eval("(nth 0 '(a b c))", "a");
        assert_eval("(nth 2 '(a b c))", "c");
        assert_eval_error("(car '())", &wrong_type());
        assert_eval_error("(cdr 5)", &wrong_type());
        assert_eval_error("(length '(1 . 2))", &wrong_type());
        assert_eval_error("(nth 3 '(a b c))", &runtime_error());
        assert_eval_error("(nth -1 '(a b c))", &runtime_error());
    }

    #[test]
    fn test_pair_mutation() {
        assert_eval("(define p (cons 1 2)) (set-car! p 9) (car p)", "9");
        assert_eval("(define p (list 1 2)) (set-cdr! p '(5 6)) p", "(1 5 6)");
        assert_eval("(define p (cons 1 2)) (set-car! p 9)", "#<undefined>");
        assert_eval_error("(set-car! '() 1)", &wrong_type());
    }

    #[test]
    fn test_equality() {
        assert_eval("(eq? 'foo 'foo)", "#t");
        assert_eval("(eq? 'foo 'bar)", "#f");
        assert_eval("(eq? '() '())", "#t");
        assert_eval("(eq? 2 2)", "#t");
        assert_eval("(eq? (list 1) (list 1))", "#f");
        assert_eval("(define l (list 1)) (eq? l l)", "#t");
        assert_eval("(eq? \"a\" \"a\")", "#f");
        assert_eval("(equal? (list 1 \"a\") (list 1 \"a\"))", "#t");
        assert_eval("(equal? '(1 2) '(1 3))", "#f");
        assert_eval("(equal? 2 2.0)", "#t");
        assert_eval("(not #f)", "#t");
        assert_eval("(not 0)", "#f");
        assert_eval("(not '())", "#f");
    }

    #[test]
    fn test_conversions() {
        assert_eval("(char->integer #\\A)", "65");
        assert_eval("(integer->char 97)", "#\\a");
        assert_eval("(integer->char 32)", "#\\space");
        assert_eval_error("(integer->char -1)", &runtime_error());
        assert_eval("(number->string 42)", "\"42\"");
        assert_eval("(number->string 6.0)", "\"6.0\"");
        assert_eval("(string->number \"42\")", "42");
        assert_eval("(string->number \"-1.5\")", "-1.5");
        assert_eval("(string->number \"1e3\")", "1000");
        assert_eval("(string->number \"abc\")", "#f");
        assert_eval("(string->number \"12abc\")", "#f");
        assert_eval("(string->number \" 12\")", "#f");
        assert_eval("(string->number \"\")", "#f");
        assert_eval("(symbol->string 'foo)", "\"foo\"");
        assert_eval("(eq? (string->symbol \"foo\") 'foo)", "#t");
        assert_eval("(string-length \"hello\")", "5");
        assert_eval("(string-append \"foo\" \"bar\" \"\")", "\"foobar\"");
        assert_eval("(string-append)", "\"\"");
        assert_eval_error("(symbol->string \"foo\")", &wrong_type());
        assert_eval_error("(string-append \"a\" 1)", &wrong_type());
    }

    #[test]
    fn test_eval_and_environment() {
        assert_eval("(eval '(+ 1 2))", "3");
        assert_eval("(eval (list '* 2 3) (environment))", "6");
        assert_eval("(define (local-env) (define secret 7) (environment)) (eval 'secret (local-env))", "7");
        assert_eval("(environment)", "#<environment>");
        assert_eval_error("(eval 1 2)", &wrong_type());
        assert_eval_error("(eval 1 (environment) 3)", &arity_error());
    }

    #[test]
    fn test_apply() {
        assert_eval("(apply + 1 2 '(3 4))", "10");
        assert_eval("(apply + '())", "0");
        assert_eval("(apply (lambda (a b) (- a b)) '(10 3))", "7");
        assert_eval_error("(apply + 1 2)", &wrong_type());
        assert_eval_error("(apply 5 '(1))", &wrong_type());
        assert_eval_error("(apply +)", &arity_error());
    }

    #[test]
    fn test_error() {
        match interpreter().eval_str("(error \"bad value:\" 42 \"x\")") {
            Err(EvalError::Runtime(message)) => assert_eq!(message, "bad value: 42 x"),
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_display_and_write_to_default_port() {
        let output = Rc::new(OutputPort::string());
        let interp = Interpreter::with_output(Rc::clone(&output));
        interp
            .eval_str("(display \"hi\") (write-char #\\space) (write \"hi\") (newline) (display '(1 #\\a))")
            .unwrap();
        assert_eq!(output.contents(), Some("hi \"hi\"\n(1 a)".to_string()));
    }

    #[test]
    fn test_string_ports() {
        assert_eval(
            "(define p (open-output-string))
             (write 'sym p) (display \" \" p) (write #\\x p) (newline p)
             (get-output-string p)",
            "\"sym #\\\\x\\n\"",
        );
        assert_eval("(eq? (current-output-port) (current-output-port))", "#t");
        assert_eval_error("(display 1 2)", &wrong_type());
        assert_eval_error("(display 1 (current-output-port) 3)", &arity_error());
        assert_eval_error("(get-output-string 5)", &wrong_type());
        assert_eval_error(
            "(define p (open-output-string)) (close-output-port p) (display 1 p)",
            &runtime_error(),
        );
    }

    #[test]
    fn test_file_ports_print_their_path() {
        let path = std::env::temp_dir().join(format!("schemelet-ports-{}.scm", std::process::id()));
        let path_text = path.display().to_string();
        let program = format!(
            "(define out (open-output-file \"{0}\"))
             (close-output-port out)
             (list out (open-input-file \"{0}\"))",
            path_text
        );
        assert_eval(
            &program,
            &format!("(#<output-port {0}> #<input-port {0}>)", path_text),
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_ports_and_load() {
        let path = std::env::temp_dir().join(format!("schemelet-prims-{}.scm", std::process::id()));
        let path_text = path.display().to_string().replace('\\', "/");
        let program = format!(
            "(define out (open-output-file \"{0}\"))
             (write '(define loaded 41) out)
             (display \" x\" out)
             (close-output-port out)
             (define in (open-input-file \"{0}\"))
             (define first (read in))
             (define c1 (read-char in))
             (define c2 (peek-char in))
             (define second (read in))
             (define end (read in))
             (close-input-port in)
             (list first c1 c2 second end)",
            path_text
        );
        assert_eval(&program, "((define loaded 41) #\\space #\\x x #<undefined>)");

        let loaded = format!(
            "(define out (open-output-file \"{0}\"))
             (write '(define loaded 41) out)
             (close-output-port out)
             (list (load \"{0}\") (+ loaded 1))",
            path_text
        );
        assert_eval(&loaded, "(#<undefined> 42)");
        std::fs::remove_file(&path).unwrap();

        assert_eval_error(
            "(open-input-file \"/nonexistent/schemelet/file.scm\")",
            &runtime_error(),
        );
        assert_eval_error("(load \"/nonexistent/schemelet/file.scm\")", &runtime_error());
    }

    #[test]
    fn test_read_from_closed_port() {
        let path = std::env::temp_dir().join(format!("schemelet-closed-{}.scm", std::process::id()));
        std::fs::write(&path, "1 2").unwrap();
        let program = format!(
            "(define in (open-input-file \"{}\")) (close-input-port in) (read in)",
            path.display().to_string().replace('\\', "/")
        );
        assert_eval_error(&program, &runtime_error());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_syntax_error_propagates() {
        let path = std::env::temp_dir().join(format!("schemelet-bad-{}.scm", std::process::id()));
        std::fs::write(&path, "(1 2").unwrap();
        let program = format!(
            "(read (open-input-file \"{}\"))",
            path.display().to_string().replace('\\', "/")
        );
        assert_eval_error(
            &program,
            &EvalError::Read(crate::reader::ReadError::Syntax {
                message: String::new(),
                position: Default::default(),
                span: Default::default(),
            }),
        );
        std::fs::remove_file(&path).unwrap();
    }
}

use crate::environment::{Bindings, EnvError, Environment, Frame, GlobalTable};
use crate::reader::{ReadError, Reader};
use crate::types::{Arity, Closure, Native, Object, Pair, Symbol};
use std::path::Path;
use thiserror::Error;

// --- Evaluation Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Wrong number of arguments to '{name}': expected {expected}, got {got}")]
    WrongNumberArguments {
        name: String,
        expected: Arity,
        got: usize,
    },
    #[error("Wrong type argument to '{procedure}': {value}")]
    WrongTypeArgument { procedure: String, value: String },
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn wrong_type(native: &Native, value: &Object) -> Self {
        EvalError::WrongTypeArgument {
            procedure: native.name().to_string(),
            value: value.to_string(),
        }
    }
}

// Result type alias for convenience
pub type EvalResult<T = Object> = Result<T, EvalError>;

// --- Evaluate Function ---

/// Evaluates `expr` in `env`.
///
/// Recursion follows the shape of the program: there is no tail-call
/// elimination, so deep non-tail recursion in Scheme code consumes host stack.
pub fn evaluate(expr: &Object, env: &Environment) -> EvalResult {
    match expr {
        Object::Integer(_)
        | Object::Float(_)
        | Object::String(_)
        | Object::Boolean(_)
        | Object::Character(_)
        | Object::EmptyList
        | Object::Undefined => Ok(expr.clone()),

        Object::Symbol(symbol) => Ok(env.lookup(symbol)?),

        Object::Pair(pair) => evaluate_combination(expr, pair, env),

        Object::SpecialForm(_)
        | Object::Procedure(_)
        | Object::Closure(_)
        | Object::Environment(_)
        | Object::InputPort(_)
        | Object::OutputPort(_) => Err(EvalError::Syntax(format!("cannot evaluate {}", expr))),
    }
}

// The operator is resolved first, since its *current* binding decides
// whether the operands get evaluated at all.
fn evaluate_combination(expr: &Object, pair: &Pair, env: &Environment) -> EvalResult {
    let head = pair.car();
    let operands = pair
        .cdr()
        .to_vec()
        .ok_or_else(|| EvalError::Syntax(format!("improper combination {}", expr)))?;

    let operator = match &head {
        Object::Symbol(symbol) => env.lookup(symbol)?,
        Object::Pair(_) => evaluate(&head, env)?,
        _ => return Err(EvalError::Syntax(format!("{} is not applicable", head))),
    };

    match &operator {
        Object::SpecialForm(form) => form.invoke(env, operands),
        Object::Procedure(_) | Object::Closure(_) => {
            let args = evaluate_operands(&operands, env)?;
            apply(&operator, args, env)
        }
        _ => Err(EvalError::Syntax(format!(
            "{} is not applicable in {}",
            operator, expr
        ))),
    }
}

/// Evaluates each operand left to right.
pub fn evaluate_operands(operands: &[Object], env: &Environment) -> EvalResult<Vec<Object>> {
    operands.iter().map(|operand| evaluate(operand, env)).collect()
}

/// Evaluates a body in order and returns the last value, or Undefined when
/// the body is empty.
pub fn evaluate_body(body: &[Object], env: &Environment) -> EvalResult {
    let mut result = Object::Undefined;
    for expr in body {
        result = evaluate(expr, env)?;
    }
    Ok(result)
}

/// Applies a procedure or closure to already evaluated arguments.
pub fn apply(procedure: &Object, args: Vec<Object>, env: &Environment) -> EvalResult {
    match procedure {
        Object::Procedure(native) => native.invoke(env, args),
        Object::Closure(closure) => apply_closure(closure, args, env),
        other => Err(EvalError::WrongTypeArgument {
            procedure: "apply".to_string(),
            value: other.to_string(),
        }),
    }
}

fn apply_closure(closure: &Closure, args: Vec<Object>, env: &Environment) -> EvalResult {
    if !closure.arity().accepts(args.len()) {
        return Err(EvalError::WrongNumberArguments {
            name: closure.display_name().to_string(),
            expected: closure.arity(),
            got: args.len(),
        });
    }
    tracing::trace!(closure = closure.display_name(), args = args.len(), "apply");

    let bindings: Bindings = closure.params().iter().cloned().zip(args).collect();
    let call_env = env.new_enclosed(closure.captured(), Frame::new(bindings));
    evaluate_body(closure.body(), &call_env)
}

/// Reads and evaluates every datum left in `reader`, returning the last value.
pub fn evaluate_reader(reader: &mut Reader, env: &Environment) -> EvalResult {
    let mut result = Object::Undefined;
    while let Some(expr) = reader.read(env.globals())? {
        result = evaluate(&expr, env)?;
    }
    Ok(result)
}

/// Reads and evaluates a whole source file, returning the last value.
pub fn evaluate_file(path: &Path, env: &Environment) -> EvalResult {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EvalError::Runtime(format!("cannot load {}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "loading file");
    evaluate_reader(&mut Reader::new(text), env)
}

fn make_closure(
    name: Option<Symbol>,
    params: &Object,
    body: &[Object],
    env: &Environment,
) -> EvalResult {
    let params = params
        .to_vec()
        .ok_or_else(|| EvalError::Syntax(format!("parameter list must be a proper list: {}", params)))?
        .into_iter()
        .map(|param| match param {
            Object::Symbol(symbol) => Ok(symbol),
            other => Err(EvalError::Syntax(format!(
                "parameter must be a symbol, got {}",
                other
            ))),
        })
        .collect::<EvalResult<Vec<Symbol>>>()?;
    Ok(Object::closure(Closure::new(
        name,
        params,
        body.to_vec(),
        env.snapshot(),
    )))
}

// --- Special Forms ---
// Each receives its operands unevaluated; arity was checked by `Native::invoke`.

fn evaluate_quote(_env: &Environment, args: Vec<Object>, form: &Native) -> EvalResult {
    let [expr] = form.fixed_args(args)?;
    Ok(expr)
}

fn evaluate_define(env: &Environment, args: Vec<Object>, form: &Native) -> EvalResult {
    match args.as_slice() {
        [Object::Symbol(name), value] => {
            let value = evaluate(value, env)?;
            env.define(name.clone(), value);
            Ok(Object::Symbol(name.clone()))
        }
        [Object::Symbol(_), ..] => Err(EvalError::WrongNumberArguments {
            name: form.name().to_string(),
            expected: Arity::exactly(2),
            got: args.len(),
        }),
        [Object::Pair(signature), body @ ..] => {
            let name = signature.car().as_symbol().cloned().ok_or_else(|| {
                EvalError::Syntax(format!("procedure name must be a symbol: {}", signature.car()))
            })?;
            let closure = make_closure(Some(name.clone()), &signature.cdr(), body, env)?;
            env.define(name.clone(), closure);
            Ok(Object::Symbol(name))
        }
        [other, ..] => Err(EvalError::Syntax(format!(
            "first argument of 'define' must be a symbol or a list, got {}",
            other
        ))),
        [] => Err(EvalError::Internal("define called without operands".to_string())),
    }
}

fn evaluate_set(env: &Environment, args: Vec<Object>, form: &Native) -> EvalResult {
    let [target, value] = form.fixed_args(args)?;
    let name = match target {
        Object::Symbol(name) => name,
        other => {
            return Err(EvalError::Syntax(format!(
                "first argument of 'set!' must be a symbol, got {}",
                other
            )));
        }
    };
    let value = evaluate(&value, env)?;
    env.set(&name, value)?;
    Ok(Object::Undefined)
}

fn evaluate_if(env: &Environment, args: Vec<Object>, form: &Native) -> EvalResult {
    let (condition, consequent, alternate) = match args.as_slice() {
        [condition, consequent] => (condition, consequent, None),
        [condition, consequent, alternate] => (condition, consequent, Some(alternate)),
        _ => {
            return Err(EvalError::WrongNumberArguments {
                name: form.name().to_string(),
                expected: Arity::exactly(3),
                got: args.len(),
            });
        }
    };

    if evaluate(condition, env)?.is_true() {
        evaluate(consequent, env)
    } else {
        match alternate {
            Some(alternate) => evaluate(alternate, env),
            None => Ok(Object::Undefined),
        }
    }
}

fn evaluate_lambda(env: &Environment, args: Vec<Object>, _form: &Native) -> EvalResult {
    match args.split_first() {
        Some((params, body)) => make_closure(None, params, body, env),
        None => Err(EvalError::Internal("lambda called without operands".to_string())),
    }
}

fn evaluate_begin(env: &Environment, args: Vec<Object>, _form: &Native) -> EvalResult {
    evaluate_body(&args, env)
}

fn evaluate_cond(env: &Environment, args: Vec<Object>, _form: &Native) -> EvalResult {
    for clause in &args {
        let parts = clause.to_vec().unwrap_or_default();
        let Some((test, body)) = parts.split_first() else {
            return Err(EvalError::Syntax(format!(
                "cond clause must be a non-empty list, got {}",
                clause
            )));
        };
        let matched = match test {
            Object::Symbol(symbol) if symbol.name() == "else" => true,
            _ => evaluate(test, env)?.is_true(),
        };
        if matched {
            return evaluate_body(body, env);
        }
    }
    Ok(Object::Undefined)
}

// Binding values are evaluated in the outer environment before the new
// frame exists, so they cannot see each other.
fn evaluate_let(env: &Environment, args: Vec<Object>, _form: &Native) -> EvalResult {
    let Some((specs, body)) = args.split_first() else {
        return Err(EvalError::Internal("let called without operands".to_string()));
    };
    let specs = specs
        .to_vec()
        .ok_or_else(|| EvalError::Syntax(format!("let bindings must be a list, got {}", specs)))?;

    let mut bindings = Bindings::with_capacity(specs.len());
    for spec in &specs {
        match spec.to_vec().as_deref() {
            Some([Object::Symbol(name), value]) => {
                bindings.push((name.clone(), evaluate(value, env)?));
            }
            _ => {
                return Err(EvalError::Syntax(format!("malformed let binding {}", spec)));
            }
        }
    }

    let _guard = env.push_frame(Frame::new(bindings));
    evaluate_body(body, env)
}

fn evaluate_and(env: &Environment, args: Vec<Object>, _form: &Native) -> EvalResult {
    let mut result = Object::Boolean(true);
    for expr in &args {
        result = evaluate(expr, env)?;
        if !result.is_true() {
            break;
        }
    }
    Ok(result)
}

fn evaluate_or(env: &Environment, args: Vec<Object>, _form: &Native) -> EvalResult {
    for expr in &args {
        let value = evaluate(expr, env)?;
        if value.is_true() {
            return Ok(value);
        }
    }
    Ok(Object::Boolean(false))
}

/// Installs the built-in special forms into the global table.
pub fn install_special_forms(globals: &GlobalTable) {
    globals.install_special_form("quote", Arity::exactly(1), evaluate_quote);
    globals.install_special_form("define", Arity::at_least(2), evaluate_define);
    globals.install_special_form("set!", Arity::exactly(2), evaluate_set);
    globals.install_special_form("if", Arity::at_least(2), evaluate_if);
    globals.install_special_form("lambda", Arity::at_least(1), evaluate_lambda);
    globals.install_special_form("begin", Arity::at_least(0), evaluate_begin);
    globals.install_special_form("cond", Arity::at_least(1), evaluate_cond);
    globals.install_special_form("let", Arity::at_least(1), evaluate_let);
    globals.install_special_form("and", Arity::at_least(0), evaluate_and);
    globals.install_special_form("or", Arity::at_least(0), evaluate_or);
}

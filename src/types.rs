use crate::environment::{Environment, FrameRef};
use crate::evaluator::{EvalError, EvalResult};
use crate::ports::{InputPort, OutputPort};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Tolerance used when comparing numbers and at least one side is a Float.
pub const FLOAT_EPSILON: f64 = 1e-10;

/// An interned symbol. Two symbols are the same symbol exactly when they
/// share one allocation, so comparison and hashing never look at the text.
#[derive(Clone)]
pub struct Symbol(Rc<str>);

impl Symbol {
    /// Creates a fresh, uninterned symbol. Use `GlobalTable::intern` to get
    /// the canonical one for a name.
    pub(crate) fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mutable cons cell. Mutation goes through `set_car`/`set_cdr`, which is
/// what allows cyclic structure.
pub struct Pair {
    car: RefCell<Object>,
    cdr: RefCell<Object>,
}

impl Pair {
    pub fn new(car: Object, cdr: Object) -> Self {
        Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Object {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Object {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Object) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Object) {
        *self.cdr.borrow_mut() = value;
    }
}

/// Declared argument count of a callable: exactly `count`, or at least
/// `count` when `variadic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub count: usize,
    pub variadic: bool,
}

impl Arity {
    pub fn exactly(count: usize) -> Self {
        Arity {
            count,
            variadic: false,
        }
    }

    pub fn at_least(count: usize) -> Self {
        Arity {
            count,
            variadic: true,
        }
    }

    pub fn accepts(self, got: usize) -> bool {
        if self.variadic {
            got >= self.count
        } else {
            got == self.count
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variadic {
            write!(f, "at least {}", self.count)
        } else {
            write!(f, "{}", self.count)
        }
    }
}

/// Body of a native callable. It receives the calling environment, the
/// argument list (unevaluated for special forms, evaluated for procedures)
/// and itself, so failures can name the callable.
pub type NativeFn = fn(&Environment, Vec<Object>, &Native) -> EvalResult;

/// A callable implemented in Rust. The same type backs both special forms
/// and native procedures; the `Object` tag decides which one it is.
pub struct Native {
    name: String,
    arity: Arity,
    body: NativeFn,
}

impl Native {
    pub fn new(name: &str, arity: Arity, body: NativeFn) -> Self {
        Native {
            name: name.to_string(),
            arity,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Checks the argument count against the declared arity, then runs the body.
    pub fn invoke(&self, env: &Environment, args: Vec<Object>) -> EvalResult {
        if !self.arity.accepts(args.len()) {
            return Err(EvalError::WrongNumberArguments {
                name: self.name.clone(),
                expected: self.arity,
                got: args.len(),
            });
        }
        (self.body)(env, args, self)
    }

    /// Moves exactly `N` arguments out of `args`.
    pub fn fixed_args<const N: usize>(&self, args: Vec<Object>) -> EvalResult<[Object; N]> {
        <[Object; N]>::try_from(args).map_err(|args: Vec<Object>| {
            EvalError::WrongNumberArguments {
                name: self.name.clone(),
                expected: Arity::exactly(N),
                got: args.len(),
            }
        })
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({}, {})", self.name, self.arity)
    }
}

/// A user-defined procedure: parameters, body, and the frames that were
/// visible where the `lambda` was evaluated.
pub struct Closure {
    name: Option<Symbol>,
    params: Vec<Symbol>,
    body: Vec<Object>,
    captured: Rc<[FrameRef]>,
}

impl Closure {
    pub fn new(
        name: Option<Symbol>,
        params: Vec<Symbol>,
        body: Vec<Object>,
        captured: Rc<[FrameRef]>,
    ) -> Self {
        Closure {
            name,
            params,
            body,
            captured,
        }
    }

    pub fn name(&self) -> Option<&Symbol> {
        self.name.as_ref()
    }

    pub fn params(&self) -> &[Symbol] {
        &self.params
    }

    pub fn body(&self) -> &[Object] {
        &self.body
    }

    pub fn captured(&self) -> Rc<[FrameRef]> {
        Rc::clone(&self.captured)
    }

    pub fn arity(&self) -> Arity {
        Arity::exactly(self.params.len())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_ref().map_or("lambda", |name| name.name())
    }
}

/// Every runtime value. Code and data share this representation.
#[derive(Clone)]
pub enum Object {
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Boolean(bool),
    Character(char),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    EmptyList,
    Undefined,
    SpecialForm(Rc<Native>),
    Procedure(Rc<Native>),
    Closure(Rc<Closure>),
    Environment(Environment),
    InputPort(Rc<InputPort>),
    OutputPort(Rc<OutputPort>),
}

impl Object {
    pub fn string(s: &str) -> Object {
        Object::String(Rc::from(s))
    }

    pub fn cons(car: Object, cdr: Object) -> Object {
        Object::Pair(Rc::new(Pair::new(car, cdr)))
    }

    /// Builds a proper list from `items`.
    pub fn list(items: Vec<Object>) -> Object {
        Object::list_with_tail(items, Object::EmptyList)
    }

    /// Builds `(items... . tail)`.
    pub fn list_with_tail(items: Vec<Object>, tail: Object) -> Object {
        items
            .into_iter()
            .rev()
            .fold(tail, |cdr, car| Object::cons(car, cdr))
    }

    pub fn special_form(native: Native) -> Object {
        Object::SpecialForm(Rc::new(native))
    }

    pub fn procedure(native: Native) -> Object {
        Object::Procedure(Rc::new(native))
    }

    pub fn closure(closure: Closure) -> Object {
        Object::Closure(Rc::new(closure))
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Object::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Rc<Pair>> {
        match self {
            Object::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Everything except `#f` counts as true.
    pub fn is_true(&self) -> bool {
        !matches!(self, Object::Boolean(false))
    }

    pub fn is_self_evaluating(&self) -> bool {
        matches!(
            self,
            Object::Integer(_)
                | Object::Float(_)
                | Object::String(_)
                | Object::Boolean(_)
                | Object::Character(_)
                | Object::EmptyList
                | Object::Undefined
        )
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, Object::Procedure(_) | Object::Closure(_))
    }

    pub fn is_list_type(&self) -> bool {
        matches!(self, Object::Pair(_) | Object::EmptyList)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Object::Undefined)
    }

    /// Collects the elements of a proper list. `None` for anything else,
    /// including a dotted tail. Does not terminate on a cyclic list.
    pub fn to_vec(&self) -> Option<Vec<Object>> {
        let mut items = Vec::new();
        let mut current = self.clone();
        loop {
            match current {
                Object::EmptyList => return Some(items),
                Object::Pair(pair) => {
                    items.push(pair.car());
                    current = pair.cdr();
                }
                _ => return None,
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "integer",
            Object::Float(_) => "float",
            Object::String(_) => "string",
            Object::Boolean(_) => "boolean",
            Object::Character(_) => "character",
            Object::Symbol(_) => "symbol",
            Object::Pair(_) => "pair",
            Object::EmptyList => "empty-list",
            Object::Undefined => "undefined",
            Object::SpecialForm(_) => "special-form",
            Object::Procedure(_) => "procedure",
            Object::Closure(_) => "closure",
            Object::Environment(_) => "environment",
            Object::InputPort(_) => "input-port",
            Object::OutputPort(_) => "output-port",
        }
    }

    /// Identity comparison (`eq?`). Immediate values compare by value,
    /// floats by bit pattern, everything else by handle.
    pub fn is_eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a.to_bits() == b.to_bits(),
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Character(a), Object::Character(b)) => a == b,
            (Object::EmptyList, Object::EmptyList) => true,
            (Object::Undefined, Object::Undefined) => true,
            (Object::String(a), Object::String(b)) => Rc::ptr_eq(a, b),
            (Object::Symbol(a), Object::Symbol(b)) => a == b,
            (Object::Pair(a), Object::Pair(b)) => Rc::ptr_eq(a, b),
            (Object::SpecialForm(a), Object::SpecialForm(b)) => Rc::ptr_eq(a, b),
            (Object::Procedure(a), Object::Procedure(b)) => Rc::ptr_eq(a, b),
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::Environment(a), Object::Environment(b)) => a == b,
            (Object::InputPort(a), Object::InputPort(b)) => Rc::ptr_eq(a, b),
            (Object::OutputPort(a), Object::OutputPort(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural comparison (`equal?`). Does not terminate on cyclic data.
    pub fn is_equal(&self, other: &Object) -> bool {
        match (self, other) {
            (
                Object::Integer(_) | Object::Float(_),
                Object::Integer(_) | Object::Float(_),
            ) => numbers_equal(self, other),
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Pair(a), Object::Pair(b)) => {
                Rc::ptr_eq(a, b) || (a.car().is_equal(&b.car()) && a.cdr().is_equal(&b.cdr()))
            }
            _ => self.is_eq(other),
        }
    }

    /// Wraps the object for `display`-style output: strings and characters
    /// are written raw instead of in reader syntax.
    pub fn display(&self) -> DisplayObject<'_> {
        DisplayObject(self)
    }
}

/// Numeric equality. Exact for two Integers, within `FLOAT_EPSILON`
/// otherwise. Non-numbers are never equal.
pub fn numbers_equal(a: &Object, b: &Object) -> bool {
    match (a, b) {
        (Object::Integer(a), Object::Integer(b)) => a == b,
        (Object::Integer(a), Object::Float(b)) => (*a as f64 - b).abs() < FLOAT_EPSILON,
        (Object::Float(a), Object::Integer(b)) => (a - *b as f64).abs() < FLOAT_EPSILON,
        (Object::Float(a), Object::Float(b)) => (a - b).abs() < FLOAT_EPSILON,
        _ => false,
    }
}

// `structural` equality is what tests and host code want from `==`.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        return write!(f, "+nan.0");
    }
    if n.is_infinite() {
        return write!(f, "{}inf.0", if n > 0.0 { "+" } else { "-" });
    }
    // Debug keeps a ".0" or an exponent, so the text reads back as a Float,
    // except for large magnitudes like 1e21 which need the point added.
    let text = format!("{:?}", n);
    match text.split_once('e') {
        Some((mantissa, exponent)) if !mantissa.contains('.') && !exponent.starts_with('-') => {
            write!(f, "{}.0e{}", mantissa, exponent)
        }
        _ => f.write_str(&text),
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

fn write_character(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    match c {
        ' ' => write!(f, "#\\space"),
        '\n' => write!(f, "#\\newline"),
        c => write!(f, "#\\{}", c),
    }
}

// Lists print with dotted notation only for a non-list tail.
fn write_object(f: &mut fmt::Formatter<'_>, object: &Object, readable: bool) -> fmt::Result {
    match object {
        Object::Integer(n) => write!(f, "{}", n),
        Object::Float(n) => write_float(f, *n),
        Object::String(s) if readable => write_string(f, s),
        Object::String(s) => f.write_str(s),
        Object::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
        Object::Character(c) if readable => write_character(f, *c),
        Object::Character(c) => write!(f, "{}", c),
        Object::Symbol(symbol) => write!(f, "{}", symbol),
        Object::Pair(pair) => {
            f.write_str("(")?;
            write_object(f, &pair.car(), readable)?;
            let mut tail = pair.cdr();
            loop {
                match tail {
                    Object::Pair(next) => {
                        f.write_str(" ")?;
                        write_object(f, &next.car(), readable)?;
                        tail = next.cdr();
                    }
                    Object::EmptyList => break,
                    other => {
                        f.write_str(" . ")?;
                        write_object(f, &other, readable)?;
                        break;
                    }
                }
            }
            f.write_str(")")
        }
        Object::EmptyList => write!(f, "()"),
        Object::Undefined => write!(f, "#<undefined>"),
        Object::SpecialForm(native) => write!(f, "#<special-form {}>", native.name()),
        Object::Procedure(native) => write!(f, "#<procedure {}>", native.name()),
        Object::Closure(closure) => match closure.name() {
            Some(name) => write!(f, "#<closure {}>", name),
            None => write!(f, "#<closure>"),
        },
        Object::Environment(_) => write!(f, "#<environment>"),
        Object::InputPort(port) => write!(f, "#<input-port {}>", port.name()),
        Object::OutputPort(port) => write!(f, "#<output-port {}>", port.name()),
    }
}

// Canonical printer: output reads back as the same datum where possible.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_object(f, self, true)
    }
}

pub struct DisplayObject<'a>(&'a Object);

impl fmt::Display for DisplayObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_object(f, self.0, false)
    }
}

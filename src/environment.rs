use crate::ports::OutputPort;
use crate::types::{Arity, Native, NativeFn, Object, Symbol};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

// --- Environment Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Unbound variable: '{0}'")]
    UnboundedVariable(String),
    #[error("Cannot set! undefined variable: '{0}'")]
    SymbolNotDefined(String),
}

// --- Global Table ---

/// Interpreter-wide state: the symbol intern table and the global bindings.
/// Each interpreter owns exactly one, so interpreters never share symbols.
pub struct GlobalTable {
    symbols: RefCell<HashMap<Rc<str>, Symbol>>,
    bindings: RefCell<HashMap<Symbol, Object>>,
    output: Rc<OutputPort>,
}

impl GlobalTable {
    pub fn new(output: Rc<OutputPort>) -> Self {
        GlobalTable {
            symbols: RefCell::new(HashMap::new()),
            bindings: RefCell::new(HashMap::new()),
            output,
        }
    }

    /// Returns the canonical symbol for `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(symbol) = self.symbols.borrow().get(name) {
            return symbol.clone();
        }
        let symbol = Symbol::new(name);
        self.symbols
            .borrow_mut()
            .insert(Rc::from(name), symbol.clone());
        symbol
    }

    pub fn lookup(&self, symbol: &Symbol) -> Option<Object> {
        self.bindings.borrow().get(symbol).cloned()
    }

    /// Binds or overwrites a global.
    pub fn define(&self, symbol: Symbol, value: Object) {
        tracing::debug!(name = symbol.name(), "global define");
        self.bindings.borrow_mut().insert(symbol, value);
    }

    /// Overwrites an existing global. Returns false when `symbol` is unbound.
    pub fn set(&self, symbol: &Symbol, value: Object) -> bool {
        match self.bindings.borrow_mut().get_mut(symbol) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn install_special_form(&self, name: &str, arity: Arity, body: NativeFn) {
        let form = Object::special_form(Native::new(name, arity, body));
        self.define(self.intern(name), form);
    }

    pub fn install_native_procedure(&self, name: &str, arity: Arity, body: NativeFn) {
        let procedure = Object::procedure(Native::new(name, arity, body));
        self.define(self.intern(name), procedure);
    }

    /// The port `display`, `write` and `newline` use when none is given.
    pub fn output(&self) -> Rc<OutputPort> {
        Rc::clone(&self.output)
    }

    /// Names of every bound global.
    pub fn identifiers(&self) -> Vec<String> {
        self.bindings
            .borrow()
            .keys()
            .map(|symbol| symbol.name().to_string())
            .collect()
    }
}

// --- Frames ---

/// One binding group: name/value pairs in definition order.
pub type Bindings = Vec<(Symbol, Object)>;

pub type FrameRef = Rc<RefCell<Frame>>;

/// One lexical scope level, made of one or more binding groups.
#[derive(Default)]
pub struct Frame {
    groups: Vec<Bindings>,
}

impl Frame {
    pub fn new(bindings: Bindings) -> Self {
        Frame {
            groups: vec![bindings],
        }
    }

    pub fn into_ref(self) -> FrameRef {
        Rc::new(RefCell::new(self))
    }

    /// Opens a new innermost binding group.
    pub fn push_group(&mut self, bindings: Bindings) {
        self.groups.push(bindings);
    }

    // Innermost group first; inside a group the latest binding shadows earlier ones.
    fn find(&self, symbol: &Symbol) -> Option<(usize, usize)> {
        self.groups
            .iter()
            .enumerate()
            .rev()
            .find_map(|(group_index, group)| {
                group
                    .iter()
                    .rposition(|(name, _)| name == symbol)
                    .map(|binding_index| (group_index, binding_index))
            })
    }

    pub fn lookup(&self, symbol: &Symbol) -> Option<Object> {
        self.find(symbol)
            .map(|(group, binding)| self.groups[group][binding].1.clone())
    }

    /// Adds a new binding to the innermost group, shadowing any earlier one.
    pub fn define(&mut self, symbol: Symbol, value: Object) {
        match self.groups.last_mut() {
            Some(group) => group.push((symbol, value)),
            None => self.groups.push(vec![(symbol, value)]),
        }
    }

    /// Mutates the visible binding in place. Returns false when absent.
    pub fn set(&mut self, symbol: &Symbol, value: Object) -> bool {
        match self.find(symbol) {
            Some((group, binding)) => {
                self.groups[group][binding].1 = value;
                true
            }
            None => false,
        }
    }
}

// --- Environment Definition ---

struct Scope {
    // Innermost frame last.
    frames: RefCell<Vec<FrameRef>>,
    // A closure's snapshot, innermost frame first.
    captured: Option<Rc<[FrameRef]>>,
    globals: Rc<GlobalTable>,
}

/// A frame stack plus the captured frames of the closure being run (if
/// any) and the shared global table. Cloning shares the same environment.
#[derive(Clone)]
pub struct Environment {
    scope: Rc<Scope>,
}

impl Environment {
    /// Creates the top-level environment: no frames, globals only.
    pub fn new_global(globals: Rc<GlobalTable>) -> Self {
        Environment {
            scope: Rc::new(Scope {
                frames: RefCell::new(Vec::new()),
                captured: None,
                globals,
            }),
        }
    }

    /// Creates the environment a closure body runs in: one fresh frame on
    /// top of the closure's captured frames, sharing this environment's globals.
    pub fn new_enclosed(&self, captured: Rc<[FrameRef]>, frame: Frame) -> Self {
        Environment {
            scope: Rc::new(Scope {
                frames: RefCell::new(vec![frame.into_ref()]),
                captured: Some(captured),
                globals: Rc::clone(&self.scope.globals),
            }),
        }
    }

    pub fn globals(&self) -> &Rc<GlobalTable> {
        &self.scope.globals
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.scope.globals.intern(name)
    }

    fn captured_frames(&self) -> &[FrameRef] {
        self.scope.captured.as_deref().unwrap_or(&[])
    }

    /// Looks up a variable's value: own frames innermost first, then the
    /// captured frames, then the global table.
    pub fn lookup(&self, symbol: &Symbol) -> Result<Object, EnvError> {
        let own = self.scope.frames.borrow();
        own.iter()
            .rev()
            .chain(self.captured_frames())
            .find_map(|frame| frame.borrow().lookup(symbol))
            .or_else(|| self.scope.globals.lookup(symbol))
            .ok_or_else(|| EnvError::UnboundedVariable(symbol.name().to_string()))
    }

    /// Binds globally when no frame is open, else adds a new binding to the
    /// innermost frame.
    pub fn define(&self, symbol: Symbol, value: Object) {
        match self.scope.frames.borrow().last() {
            Some(frame) => frame.borrow_mut().define(symbol, value),
            None => self.scope.globals.define(symbol, value),
        }
    }

    /// Mutates the nearest existing binding. Assigning an unbound name is an error.
    pub fn set(&self, symbol: &Symbol, value: Object) -> Result<(), EnvError> {
        let own = self.scope.frames.borrow();
        let frame = own
            .iter()
            .rev()
            .chain(self.captured_frames())
            .find(|frame| frame.borrow().lookup(symbol).is_some());
        let updated = match frame {
            Some(frame) => frame.borrow_mut().set(symbol, value),
            None => self.scope.globals.set(symbol, value),
        };
        if updated {
            Ok(())
        } else {
            Err(EnvError::SymbolNotDefined(symbol.name().to_string()))
        }
    }

    /// Pushes `frame`; it is popped when the returned guard is dropped, on
    /// every exit path.
    pub fn push_frame(&self, frame: Frame) -> FrameGuard<'_> {
        self.scope.frames.borrow_mut().push(frame.into_ref());
        FrameGuard { env: self }
    }

    fn pop_frame(&self) {
        self.scope.frames.borrow_mut().pop();
    }

    /// Copies the visible frame stack, innermost first. The frames are
    /// shared, the stack is not: frames pushed or popped here later are
    /// invisible to the snapshot.
    ///
    /// A closure stored in one of its own captured frames (an internal
    /// `define` of a procedure) forms an `Rc` cycle, and that frame is
    /// never freed.
    pub fn snapshot(&self) -> Rc<[FrameRef]> {
        let own = self.scope.frames.borrow();
        own.iter()
            .rev()
            .chain(self.captured_frames())
            .cloned()
            .collect()
    }

    pub fn depth(&self) -> usize {
        self.scope.frames.borrow().len()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Environment(frames: {}, captured: {})",
            self.depth(),
            self.captured_frames().len()
        )
    }
}

/// Pops the frame pushed by `Environment::push_frame` when dropped.
pub struct FrameGuard<'a> {
    env: &'a Environment,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.env.pop_frame();
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn globals() -> Rc<GlobalTable> {
        Rc::new(GlobalTable::new(Rc::new(OutputPort::string())))
    }

    fn num(n: i64) -> Object {
        Object::Integer(n)
    }

    #[test]
    fn test_intern_returns_same_symbol() {
        let table = globals();
        assert_eq!(table.intern("foo"), table.intern("foo"));
        assert_ne!(table.intern("foo"), table.intern("bar"));
    }

    #[test]
    fn test_interpreters_do_not_share_symbols() {
        assert_ne!(globals().intern("foo"), globals().intern("foo"));
    }

    #[test]
    fn test_define_and_get_global() {
        let env = Environment::new_global(globals());
        let x = env.intern("x");
        env.define(x.clone(), num(10));
        assert_eq!(env.lookup(&x), Ok(num(10)));
    }

    #[test]
    fn test_get_unbound_global() {
        let env = Environment::new_global(globals());
        let y = env.intern("y");
        assert_eq!(
            env.lookup(&y),
            Err(EnvError::UnboundedVariable("y".to_string()))
        );
    }

    #[test]
    fn test_define_in_frame_shadows_global() {
        let env = Environment::new_global(globals());
        let x = env.intern("x");
        env.define(x.clone(), num(10));
        {
            let _guard = env.push_frame(Frame::default());
            env.define(x.clone(), num(50));
            assert_eq!(env.lookup(&x), Ok(num(50)));
        }
        assert_eq!(env.lookup(&x), Ok(num(10)));
        assert_eq!(env.depth(), 0);
    }

    #[test]
    fn test_frame_popped_on_early_exit() {
        fn failing(env: &Environment) -> Result<(), EnvError> {
            let _guard = env.push_frame(Frame::default());
            env.set(&env.intern("missing"), num(1))
        }
        let env = Environment::new_global(globals());
        assert!(failing(&env).is_err());
        assert_eq!(env.depth(), 0);
    }

    #[test]
    fn test_local_define_adds_new_binding() {
        let x = Symbol::new("x");
        let mut frame = Frame::new(vec![(x.clone(), num(1))]);
        frame.define(x.clone(), num(2));
        assert_eq!(frame.lookup(&x), Some(num(2)));
        assert_eq!(frame.groups[0].len(), 2);
    }

    #[test]
    fn test_frame_groups_innermost_first() {
        let x = Symbol::new("x");
        let y = Symbol::new("y");
        let mut frame = Frame::new(vec![(x.clone(), num(1)), (y.clone(), num(2))]);
        frame.push_group(vec![(x.clone(), num(3))]);
        assert_eq!(frame.lookup(&x), Some(num(3)));
        assert_eq!(frame.lookup(&y), Some(num(2)));

        assert!(frame.set(&y, num(20)));
        assert_eq!(frame.lookup(&y), Some(num(20)));
        assert!(!frame.set(&Symbol::new("z"), num(0)));
    }

    #[test]
    fn test_set_global_and_unbound() {
        let env = Environment::new_global(globals());
        let v = env.intern("v");
        assert_eq!(
            env.set(&v, num(1)),
            Err(EnvError::SymbolNotDefined("v".to_string()))
        );
        env.define(v.clone(), num(1));
        assert_eq!(env.set(&v, num(2)), Ok(()));
        assert_eq!(env.lookup(&v), Ok(num(2)));
    }

    #[test]
    fn test_set_mutates_innermost_frame_binding() {
        let env = Environment::new_global(globals());
        let x = env.intern("x");
        env.define(x.clone(), num(0));
        let _outer = env.push_frame(Frame::new(vec![(x.clone(), num(1))]));
        let _inner = env.push_frame(Frame::default());
        env.set(&x, num(5)).unwrap();
        assert_eq!(env.lookup(&x), Ok(num(5)));
        assert_eq!(env.globals().lookup(&x), Some(num(0)));
    }

    #[test]
    fn test_snapshot_ignores_later_frames() {
        let env = Environment::new_global(globals());
        let x = env.intern("x");
        let _guard = env.push_frame(Frame::new(vec![(x.clone(), num(1))]));
        let snapshot = env.snapshot();

        let _shadow = env.push_frame(Frame::new(vec![(x.clone(), num(2))]));
        let enclosed = env.new_enclosed(snapshot, Frame::default());
        assert_eq!(enclosed.lookup(&x), Ok(num(1)));
        assert_eq!(env.lookup(&x), Ok(num(2)));
    }

    #[test]
    fn test_frames_released_with_last_snapshot() {
        let env = Environment::new_global(globals());
        let x = env.intern("x");
        let guard = env.push_frame(Frame::new(vec![(x, num(1))]));
        let snapshot = env.snapshot();
        let frame = Rc::downgrade(&snapshot[0]);
        drop(guard);
        assert!(frame.upgrade().is_some());
        drop(snapshot);
        assert!(frame.upgrade().is_none());
    }

    #[test]
    fn test_enclosed_sees_globals_and_captured_mutation() {
        let env = Environment::new_global(globals());
        let g = env.intern("g");
        let n = env.intern("n");
        env.define(g.clone(), num(7));
        let _guard = env.push_frame(Frame::new(vec![(n.clone(), num(1))]));

        let enclosed = env.new_enclosed(env.snapshot(), Frame::default());
        assert_eq!(enclosed.lookup(&g), Ok(num(7)));
        enclosed.set(&n, num(2)).unwrap();
        assert_eq!(env.lookup(&n), Ok(num(2)));
    }
}

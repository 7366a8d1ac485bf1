//! Tree-walking evaluator for the scripting subset.
//!
//! ## Control flow
//!
//! Statements produce a [`Flow`]; expressions produce values. Anything that
//! unwinds past a statement boundary is an [`Abrupt`]: a script-level throw
//! (catchable by `try`) or an interruption from the budget (not catchable).
//!
//! ## Scoping
//!
//! Each function call opens a function scope; blocks open a scope only when
//! they declare something lexically. Declarations are instantiated before
//! the first statement of their body runs, which is where redeclaration
//! errors surface and where `let`/`const`/`class` enter their dead zone.

use std::collections::HashSet;
use std::sync::Arc;

use super::ast::*;
use super::heap::{Binding, Callable, Object, ObjectId, ObjectKind, ScopeId};
use super::inspect::inspect;
use super::value::{array_index, number_to_string, strict_equals, Value};
use super::ScriptContext;
use crate::runtime::{Budget, OutputSink};

/// Deepest nesting of script calls before a `RangeError`.
pub const MAX_CALL_DEPTH: usize = 800;
/// Longest string, in bytes, a snippet may build.
pub const MAX_STRING_LENGTH: usize = 1 << 24;
/// Longest array a snippet may build.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

const THIS: &str = "this";
const CURRENT_CLASS: &str = "%class";
const INSTANCE_PROTO: &str = "%proto";

/// Why evaluation stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum Abrupt {
    Throw(Value),
    Interrupted,
}

pub type Eval<T> = Result<T, Abrupt>;

/// Completion of a statement.
#[derive(Debug, Clone, PartialEq)]
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// How a function body was entered.
struct Frame {
    /// `None` leaves `this` uninitialized until `super(...)` runs.
    this: Option<Value>,
    class: Option<(ObjectId, ObjectId)>,
}

// ===================================================================================================
// INTERPRETER
// ===================================================================================================

pub struct Interpreter<'a> {
    pub(super) ctx: &'a mut ScriptContext,
    output: &'a mut dyn OutputSink,
    budget: &'a Budget,
    check_interval: u32,
    steps: u32,
    depth: usize,
    scope: ScopeId,
    /// Arrays currently being stringified, to cut cycles.
    pub(super) joining: Vec<ObjectId>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        ctx: &'a mut ScriptContext,
        output: &'a mut dyn OutputSink,
        budget: &'a Budget,
        check_interval: u32,
    ) -> Self {
        let scope = ctx.global;
        Self {
            ctx,
            output,
            budget,
            check_interval: check_interval.max(1),
            steps: 0,
            depth: 0,
            scope,
            joining: Vec::new(),
        }
    }

    /// Runs a parsed program in the global scope.
    pub fn run_program(&mut self, program: &[Stmt]) -> Eval<()> {
        let global = self.ctx.global;
        self.scope = global;
        self.instantiate(program, global, true)?;
        self.exec_statements(program)?;
        Ok(())
    }

    /// Polls the budget every `check_interval` steps.
    pub fn tick(&mut self) -> Eval<()> {
        self.steps = self.steps.wrapping_add(1);
        if self.steps % self.check_interval == 0 && self.budget.exhausted() {
            return Err(Abrupt::Interrupted);
        }
        Ok(())
    }

    /// Writes console text, one sink line per text line.
    pub fn emit(&mut self, text: &str) {
        for line in text.split('\n') {
            self.output.emit(line);
        }
    }

    // ===============================================================================================
    // ERRORS AND ALLOCATION
    // ===============================================================================================

    pub fn alloc(&mut self, object: Object) -> Eval<ObjectId> {
        self.ctx
            .heap
            .alloc(object)
            .ok_or_else(|| Abrupt::Throw(Value::str("RangeError: Out of memory")))
    }

    pub fn new_object(&mut self) -> Eval<ObjectId> {
        let proto = self.ctx.intrinsics.object_proto;
        self.alloc(Object::new(ObjectKind::Ordinary, Some(proto)))
    }

    pub fn new_array(&mut self, items: Vec<Value>) -> Eval<Value> {
        if items.len() > MAX_ARRAY_LENGTH {
            return self.throw_error("RangeError", "Invalid array length");
        }
        let proto = self.ctx.intrinsics.array_proto;
        let id = self.alloc(Object::new(ObjectKind::Array(items), Some(proto)))?;
        Ok(Value::Object(id))
    }

    /// Builds an error object of the named builtin type.
    pub fn new_error(&mut self, name: &str, message: impl Into<String>) -> Eval<Value> {
        let message = message.into();
        let proto = self.ctx.intrinsics.error_proto(name);
        let mut object = Object::new(ObjectKind::Error, Some(proto));
        object.define("message", Value::str(message.as_str()), false);
        match self.ctx.heap.alloc(object) {
            Some(id) => Ok(Value::Object(id)),
            None => Err(Abrupt::Throw(Value::str(format!("{}: {}", name, message)))),
        }
    }

    pub fn throw_error<T>(&mut self, name: &str, message: impl Into<String>) -> Eval<T> {
        let error = self.new_error(name, message)?;
        Err(Abrupt::Throw(error))
    }

    /// Rejects strings past the length cap.
    pub fn check_string(&mut self, text: String) -> Eval<Value> {
        if text.len() > MAX_STRING_LENGTH {
            return self.throw_error("RangeError", "Invalid string length");
        }
        Ok(Value::Str(text))
    }

    /// `Name: message` for error objects, the plain text otherwise.
    pub fn describe_thrown(&self, value: &Value) -> String {
        let heap = &self.ctx.heap;
        let Value::Object(id) = value else {
            return value.primitive_to_string().unwrap_or_default();
        };
        let error_proto = self.ctx.intrinsics.error_proto("Error");
        let is_error = matches!(heap.get(*id).kind, ObjectKind::Error)
            || heap.inherits_from(*id, error_proto);
        if !is_error {
            return inspect(heap, value);
        }
        let text = |key: &str| {
            heap.lookup(*id, key)
                .and_then(Value::primitive_to_string)
                .unwrap_or_default()
        };
        let name = text("name");
        let message = text("message");
        if message.is_empty() {
            name
        } else {
            format!("{}: {}", name, message)
        }
    }

    // ===============================================================================================
    // DECLARATIONS
    // ===============================================================================================

    /// Declares everything `body` introduces into `scope`.
    ///
    /// Redeclaration errors are reported before anything is bound.
    fn instantiate(&mut self, body: &[Stmt], scope: ScopeId, hoist_vars: bool) -> Eval<()> {
        let mut vars = Vec::new();
        if hoist_vars {
            collect_vars(body, &mut vars);
        }
        let lexical = lexical_names(body);
        let functions: Vec<&Arc<FunctionDef>> = body
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Function(def) => Some(def),
                _ => None,
            })
            .collect();
        let function_names: Vec<&str> =
            functions.iter().filter_map(|def| def.name.as_deref()).collect();

        let mut seen = HashSet::new();
        for (name, _) in &lexical {
            let existing = self.ctx.scopes.get(scope).bindings.contains_key(*name);
            if !seen.insert(*name)
                || existing
                || vars.contains(name)
                || function_names.contains(name)
            {
                return self.throw_error(
                    "SyntaxError",
                    format!("Identifier '{}' has already been declared", name),
                );
            }
        }
        for name in vars.iter().chain(function_names.iter()) {
            let clashes = self
                .ctx
                .scopes
                .get(scope)
                .bindings
                .get(*name)
                .map_or(false, |binding| binding.lexical);
            if clashes {
                return self.throw_error(
                    "SyntaxError",
                    format!("Identifier '{}' has already been declared", name),
                );
            }
        }

        for name in vars {
            if !self.ctx.scopes.get(scope).bindings.contains_key(name) {
                self.ctx
                    .scopes
                    .declare(scope, name, Binding::var(Value::Undefined));
            }
        }
        for (name, kind) in lexical {
            let mutable = kind != DeclKind::Const;
            self.ctx
                .scopes
                .declare(scope, name, Binding::uninitialized(mutable));
        }
        for def in functions {
            if let Some(name) = &def.name {
                let function = self.make_function(def.clone(), scope)?;
                self.ctx
                    .scopes
                    .declare(scope, name.as_str(), Binding::var(function));
            }
        }
        Ok(())
    }

    fn open_scope(&mut self, function_scope: bool) -> Eval<ScopeId> {
        let parent = self.scope;
        self.open_scope_in(parent, function_scope)
    }

    fn open_scope_in(&mut self, parent: ScopeId, function_scope: bool) -> Eval<ScopeId> {
        match self.ctx.scopes.open(Some(parent), function_scope) {
            Some(id) => Ok(id),
            None => self.throw_error("RangeError", "Maximum call stack size exceeded"),
        }
    }

    /// Runs `f` with `scope` current, then releases `scope`.
    fn with_scope<T>(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = saved;
        self.ctx.scopes.close(scope);
        result
    }

    pub fn lookup(&mut self, name: &str) -> Eval<Value> {
        let found = self
            .ctx
            .scopes
            .resolve(self.scope, name)
            .and_then(|scope| self.ctx.scopes.get(scope).bindings.get(name))
            .map(|binding| binding.value.clone());
        match found {
            Some(Some(value)) => Ok(value),
            Some(None) => self.throw_error(
                "ReferenceError",
                format!("Cannot access '{}' before initialization", name),
            ),
            None => self.throw_error("ReferenceError", format!("{} is not defined", name)),
        }
    }

    fn this_value(&mut self) -> Eval<Value> {
        let found = self
            .ctx
            .scopes
            .resolve(self.scope, THIS)
            .and_then(|scope| self.ctx.scopes.get(scope).bindings.get(THIS))
            .map(|binding| binding.value.clone());
        match found {
            Some(Some(value)) => Ok(value),
            Some(None) => self.throw_error(
                "ReferenceError",
                "Must call super constructor in derived class before accessing 'this' or returning from derived constructor",
            ),
            None => Ok(Value::Undefined),
        }
    }

    /// Plain assignment to a name. Undeclared names become globals.
    fn assign_name(&mut self, name: &str, value: Value) -> Eval<()> {
        let Some(scope) = self.ctx.scopes.resolve(self.scope, name) else {
            let global = self.ctx.global;
            self.ctx.scopes.declare(global, name, Binding::var(value));
            return Ok(());
        };
        let (initialized, mutable) = match self.ctx.scopes.get(scope).bindings.get(name) {
            Some(binding) => (binding.value.is_some(), binding.mutable),
            None => (false, false),
        };
        if !initialized {
            return self.throw_error(
                "ReferenceError",
                format!("Cannot access '{}' before initialization", name),
            );
        }
        if !mutable {
            return self.throw_error("TypeError", "Assignment to constant variable.");
        }
        if let Some(binding) = self.ctx.scopes.get_mut(scope).bindings.get_mut(name) {
            binding.value = Some(value);
        }
        Ok(())
    }

    /// Ends the dead zone of the nearest binding called `name`.
    fn initialize(&mut self, name: &str, value: Value) -> Eval<()> {
        let Some(scope) = self.ctx.scopes.resolve(self.scope, name) else {
            return self.throw_error("ReferenceError", format!("{} is not defined", name));
        };
        if let Some(binding) = self.ctx.scopes.get_mut(scope).bindings.get_mut(name) {
            binding.value = Some(value);
        }
        Ok(())
    }

    // ===============================================================================================
    // STATEMENTS
    // ===============================================================================================

    fn exec_statements(&mut self, body: &[Stmt]) -> Eval<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Eval<Flow> {
        if !needs_scope(body) {
            return self.exec_statements(body);
        }
        let scope = self.open_scope(false)?;
        self.with_scope(scope, |interp| {
            interp.instantiate(body, scope, false)?;
            interp.exec_statements(body)
        })
    }

    fn exec(&mut self, stmt: &Stmt) -> Eval<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::VarDecl { kind, declarators } => {
                for declarator in declarators {
                    let value = match &declarator.init {
                        Some(init) => self.eval_named(init, &declarator.name)?,
                        None if kind.is_lexical() => Value::Undefined,
                        None => continue,
                    };
                    if kind.is_lexical() {
                        self.initialize(&declarator.name, value)?;
                    } else {
                        self.assign_name(&declarator.name, value)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::Class(def) => {
                let class = self.eval_class(def)?;
                if let Some(name) = &def.name {
                    self.initialize(name, class)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.truthy() {
                    self.exec(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test)?.truthy() {
                    match self.exec(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => self.tick()?,
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    match self.exec(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => self.tick()?,
                    }
                    if !self.eval(test)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body),
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            } => self.exec_for_of(*kind, name, iterable, body),
            Stmt::Switch {
                discriminant,
                cases,
            } => self.exec_switch(discriminant, cases),
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => self.exec_try(block, handler.as_ref(), finalizer.as_deref()),
            Stmt::Throw(expr) => {
                let value = self.eval(expr)?;
                Err(Abrupt::Throw(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Block(body) => self.exec_block(body),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Eval<Flow> {
        let lexical: Vec<(String, bool)> = match init {
            Some(Stmt::VarDecl { kind, declarators }) if kind.is_lexical() => declarators
                .iter()
                .map(|d| (d.name.clone(), *kind != DeclKind::Const))
                .collect(),
            _ => Vec::new(),
        };

        if lexical.is_empty() {
            if let Some(init) = init {
                self.exec(init)?;
            }
            loop {
                if let Some(test) = test {
                    if !self.eval(test)?.truthy() {
                        break;
                    }
                }
                match self.exec(body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
                if let Some(update) = update {
                    self.eval(update)?;
                }
                self.tick()?;
            }
            return Ok(Flow::Normal);
        }

        // Each iteration runs in its own copy of the loop bindings so
        // closures created in the body keep that iteration's values.
        let loop_scope = self.open_scope(false)?;
        self.with_scope(loop_scope, |interp| {
            for (name, mutable) in &lexical {
                interp
                    .ctx
                    .scopes
                    .declare(loop_scope, name.as_str(), Binding::uninitialized(*mutable));
            }
            if let Some(init) = init {
                interp.exec(init)?;
            }
            loop {
                interp.tick()?;
                let iteration = interp.open_scope(false)?;
                for (name, _) in &lexical {
                    if let Some(binding) =
                        interp.ctx.scopes.get(loop_scope).bindings.get(name).cloned()
                    {
                        interp.ctx.scopes.declare(iteration, name.as_str(), binding);
                    }
                }
                let flow = interp.with_scope(iteration, |interp| {
                    if let Some(test) = test {
                        if !interp.eval(test)?.truthy() {
                            return Ok(None);
                        }
                    }
                    let flow = interp.exec(body)?;
                    for (name, _) in &lexical {
                        if let Some(binding) =
                            interp.ctx.scopes.get(iteration).bindings.get(name).cloned()
                        {
                            interp.ctx.scopes.declare(loop_scope, name.as_str(), binding);
                        }
                    }
                    Ok(Some(flow))
                })?;
                match flow {
                    None | Some(Flow::Break) => return Ok(Flow::Normal),
                    Some(Flow::Return(value)) => return Ok(Flow::Return(value)),
                    Some(Flow::Normal) | Some(Flow::Continue) => {}
                }
                if let Some(update) = update {
                    interp.eval(update)?;
                }
            }
        })
    }

    fn exec_for_of(
        &mut self,
        kind: DeclKind,
        name: &str,
        iterable: &Expr,
        body: &Stmt,
    ) -> Eval<Flow> {
        let iterable = self.eval(iterable)?;
        let items = self.iterate(&iterable)?;
        for item in items {
            self.tick()?;
            let flow = if kind.is_lexical() {
                let scope = self.open_scope(false)?;
                let binding = Binding {
                    value: Some(item),
                    mutable: kind != DeclKind::Const,
                    lexical: true,
                };
                self.ctx.scopes.declare(scope, name, binding);
                self.with_scope(scope, |interp| interp.exec(body))?
            } else {
                self.assign_name(name, item)?;
                self.exec(body)?
            };
            match flow {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_switch(&mut self, discriminant: &Expr, cases: &[SwitchCase]) -> Eval<Flow> {
        let value = self.eval(discriminant)?;
        let scope = self.open_scope(false)?;
        self.with_scope(scope, |interp| {
            for case in cases {
                interp.instantiate(&case.body, scope, false)?;
            }
            let mut start = None;
            for (index, case) in cases.iter().enumerate() {
                if let Some(test) = &case.test {
                    let candidate = interp.eval(test)?;
                    if strict_equals(&value, &candidate) {
                        start = Some(index);
                        break;
                    }
                }
            }
            let start = start.or_else(|| cases.iter().position(|case| case.test.is_none()));
            let Some(start) = start else {
                return Ok(Flow::Normal);
            };
            for case in &cases[start..] {
                match interp.exec_statements(&case.body)? {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Flow::Normal),
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        handler: Option<&CatchClause>,
        finalizer: Option<&[Stmt]>,
    ) -> Eval<Flow> {
        let mut result = self.exec_block(block);
        let caught = match &result {
            Err(Abrupt::Throw(thrown)) => Some(thrown.clone()),
            _ => None,
        };
        if let (Some(thrown), Some(handler)) = (caught, handler) {
            let scope = self.open_scope(false)?;
            if let Some(param) = &handler.param {
                self.ctx
                    .scopes
                    .declare(scope, param.as_str(), Binding::var(thrown));
            }
            result = self.with_scope(scope, |interp| interp.exec_block(&handler.body));
        }
        if let Some(finalizer) = finalizer {
            if matches!(result, Err(Abrupt::Interrupted)) {
                return result;
            }
            match self.exec_block(finalizer)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        result
    }

    // ===============================================================================================
    // EXPRESSIONS
    // ===============================================================================================

    pub(super) fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(chunk) => text.push_str(chunk),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr)?;
                            text.push_str(&self.to_string(&value)?);
                        }
                    }
                }
                self.check_string(text)
            }
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::This => self.this_value(),
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(elements) => {
                let items = self.eval_elements(elements)?;
                self.new_array(items)
            }
            Expr::Object(props) => self.eval_object(props),
            Expr::Function(def) => {
                let scope = self.scope;
                self.make_function(def.clone(), scope)
            }
            Expr::Class(def) => self.eval_class(def),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand),
            Expr::Update { op, prefix, target } => self.eval_update(*op, *prefix, target),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                if short_circuits(*op, &left) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Member {
                object,
                key,
                optional,
            } => {
                let object = self.eval(object)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.member_key(key)?;
                self.get(&object, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee)?;
                let args = self.eval_elements(args)?;
                if !self.is_constructor(&constructor) {
                    return self.throw_error(
                        "TypeError",
                        format!("{} is not a constructor", describe_callee(callee)),
                    );
                }
                self.construct(&constructor, args)
            }
            Expr::SuperCall(args) => self.eval_super_call(args),
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }
        }
    }

    /// Evaluates an initializer, naming anonymous functions after `name`.
    fn eval_named(&mut self, expr: &Expr, name: &str) -> Eval<Value> {
        let value = self.eval(expr)?;
        let anonymous = match expr {
            Expr::Function(def) => def.name.is_none(),
            Expr::Class(def) => def.name.is_none(),
            _ => false,
        };
        if let (true, Value::Object(id)) = (anonymous, &value) {
            self.ctx
                .heap
                .get_mut(*id)
                .define("name", Value::str(name), false);
        }
        Ok(value)
    }

    fn eval_elements(&mut self, elements: &[Element]) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Item(expr) => values.push(self.eval(expr)?),
                Element::Spread(expr) => {
                    let spread = self.eval(expr)?;
                    values.extend(self.iterate(&spread)?);
                }
            }
            if values.len() > MAX_ARRAY_LENGTH {
                return self.throw_error("RangeError", "Invalid array length");
            }
        }
        Ok(values)
    }

    fn eval_object(&mut self, props: &[ObjectProp]) -> Eval<Value> {
        let id = self.new_object()?;
        for prop in props {
            match prop {
                ObjectProp::KeyValue(key, expr) => {
                    let key = match key {
                        PropKey::Named(name) => name.clone(),
                        PropKey::Computed(expr) => {
                            let key = self.eval(expr)?;
                            self.to_key(&key)?
                        }
                    };
                    let value = self.eval_named(expr, &key)?;
                    self.ctx.heap.get_mut(id).define(key, value, true);
                }
                ObjectProp::Accessor(key, kind, def) => {
                    let key = match key {
                        PropKey::Named(name) => name.clone(),
                        PropKey::Computed(expr) => {
                            let key = self.eval(expr)?;
                            self.to_key(&key)?
                        }
                    };
                    let scope = self.scope;
                    let function = self.make_function(def.clone(), scope)?;
                    self.ctx
                        .heap
                        .get_mut(id)
                        .define_accessor(key, *kind, function, true);
                }
                ObjectProp::Spread(expr) => {
                    let source = self.eval(expr)?;
                    for (key, value) in self.own_entries(&source)? {
                        self.ctx.heap.get_mut(id).define(key, value, true);
                    }
                }
            }
        }
        Ok(Value::Object(id))
    }

    fn member_key(&mut self, key: &MemberKey) -> Eval<String> {
        match key {
            MemberKey::Named(name) => Ok(name.clone()),
            MemberKey::Computed(expr) => {
                let key = self.eval(expr)?;
                self.to_key(&key)
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> Eval<Value> {
        match op {
            UnaryOp::TypeOf => {
                if let Expr::Ident(name) = operand {
                    if self.ctx.scopes.resolve(self.scope, name).is_none() {
                        return Ok(Value::str("undefined"));
                    }
                }
                let value = self.eval(operand)?;
                Ok(Value::str(self.type_of(&value)))
            }
            UnaryOp::Delete => {
                if let Expr::Member { object, key, .. } = operand {
                    let object = self.eval(object)?;
                    let key = self.member_key(key)?;
                    if let Value::Object(id) = object {
                        let target = self.ctx.heap.get_mut(id);
                        if target.frozen {
                            return Ok(Value::Bool(false));
                        }
                        let index = array_index(&key);
                        if let ObjectKind::Array(items) = &mut target.kind {
                            if let Some(slot) = index.and_then(|i| items.get_mut(i)) {
                                *slot = Value::Undefined;
                                return Ok(Value::Bool(true));
                            }
                        }
                        target.remove(&key);
                    }
                }
                Ok(Value::Bool(true))
            }
            UnaryOp::Not => Ok(Value::Bool(!self.eval(operand)?.truthy())),
            UnaryOp::Neg => {
                let value = self.eval(operand)?;
                Ok(Value::Number(-self.to_number(&value)?))
            }
            UnaryOp::Plus => {
                let value = self.eval(operand)?;
                Ok(Value::Number(self.to_number(&value)?))
            }
            UnaryOp::Void => {
                self.eval(operand)?;
                Ok(Value::Undefined)
            }
        }
    }

    fn eval_update(&mut self, op: UpdateOp, prefix: bool, target: &Expr) -> Eval<Value> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };
        let (old, new) = match target {
            Expr::Ident(name) => {
                let current = self.lookup(name)?;
                let old = self.to_number(&current)?;
                self.assign_name(name, Value::Number(old + delta))?;
                (old, old + delta)
            }
            Expr::Member { object, key, .. } => {
                let object = self.eval(object)?;
                let key = self.member_key(key)?;
                let current = self.get(&object, &key)?;
                let old = self.to_number(&current)?;
                self.set(&object, &key, Value::Number(old + delta))?;
                (old, old + delta)
            }
            _ => {
                return self.throw_error(
                    "SyntaxError",
                    "Invalid left-hand side expression in postfix operation",
                )
            }
        };
        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn eval_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Eval<Value> {
        match target {
            Expr::Ident(name) => {
                let new = match op {
                    AssignOp::Assign => self.eval_named(value, name)?,
                    AssignOp::Compound(binary) => {
                        let current = self.lookup(name)?;
                        let right = self.eval(value)?;
                        self.binary(binary, current, right)?
                    }
                    AssignOp::Logical(logical) => {
                        let current = self.lookup(name)?;
                        if short_circuits(logical, &current) {
                            return Ok(current);
                        }
                        self.eval_named(value, name)?
                    }
                };
                self.assign_name(name, new.clone())?;
                Ok(new)
            }
            Expr::Member { object, key, .. } => {
                let object = self.eval(object)?;
                let key = self.member_key(key)?;
                let new = match op {
                    AssignOp::Assign => self.eval(value)?,
                    AssignOp::Compound(binary) => {
                        let current = self.get(&object, &key)?;
                        let right = self.eval(value)?;
                        self.binary(binary, current, right)?
                    }
                    AssignOp::Logical(logical) => {
                        let current = self.get(&object, &key)?;
                        if short_circuits(logical, &current) {
                            return Ok(current);
                        }
                        self.eval(value)?
                    }
                };
                self.set(&object, &key, new.clone())?;
                Ok(new)
            }
            _ => self.throw_error("SyntaxError", "Invalid left-hand side in assignment"),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Element]) -> Eval<Value> {
        let (function, this) = match callee {
            Expr::Member {
                object,
                key,
                optional,
            } => {
                let object = self.eval(object)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.member_key(key)?;
                let function = self.get(&object, &key)?;
                (function, object)
            }
            other => (self.eval(other)?, Value::Undefined),
        };
        let args = self.eval_elements(args)?;
        if !self.is_callable(&function) {
            return self.throw_error(
                "TypeError",
                format!("{} is not a function", describe_callee(callee)),
            );
        }
        self.call(&function, this, args)
    }

    fn eval_super_call(&mut self, args: &[Element]) -> Eval<Value> {
        let (Some(class), Some(proto)) = (
            self.hidden_object(CURRENT_CLASS),
            self.hidden_object(INSTANCE_PROTO),
        ) else {
            return self.throw_error("SyntaxError", "'super' keyword unexpected here");
        };
        let parent = match self.ctx.heap.get(class).callable() {
            Some(Callable::Script {
                parent: Some(Value::Object(parent)),
                ..
            }) => *parent,
            _ => return self.throw_error("SyntaxError", "'super' keyword unexpected here"),
        };
        let args = self.eval_elements(args)?;
        let this_scope = self.ctx.scopes.resolve(self.scope, THIS);
        let already = this_scope
            .and_then(|scope| self.ctx.scopes.get(scope).bindings.get(THIS))
            .map_or(false, |binding| binding.value.is_some());
        if already {
            return self.throw_error("ReferenceError", "Super constructor may only be called once");
        }
        let instance = self.construct_with(parent, args, proto)?;
        if let Some(scope) = this_scope {
            if let Some(binding) = self.ctx.scopes.get_mut(scope).bindings.get_mut(THIS) {
                binding.value = Some(instance.clone());
            }
        }
        if let Value::Object(id) = instance {
            self.init_fields(class, id)?;
        }
        Ok(Value::Undefined)
    }

    /// Reads one of the internal constructor bindings.
    fn hidden_object(&self, name: &str) -> Option<ObjectId> {
        let scope = self.ctx.scopes.resolve(self.scope, name)?;
        match self.ctx.scopes.get(scope).bindings.get(name)?.value {
            Some(Value::Object(id)) => Some(id),
            _ => None,
        }
    }

    // ===============================================================================================
    // FUNCTIONS AND CLASSES
    // ===============================================================================================

    fn make_function(&mut self, def: Arc<FunctionDef>, scope: ScopeId) -> Eval<Value> {
        self.ctx.scopes.capture(scope);
        let is_arrow = def.is_arrow;
        let name = def.name.clone();
        let callable = Callable::Script {
            def,
            scope,
            class: None,
            parent: None,
        };
        let mut object = Object::new(
            ObjectKind::Function(callable),
            Some(self.ctx.intrinsics.function_proto),
        );
        if let Some(name) = name {
            object.define("name", Value::Str(name), false);
        }
        let id = self.alloc(object)?;
        if !is_arrow {
            let mut proto = Object::new(ObjectKind::Ordinary, Some(self.ctx.intrinsics.object_proto));
            proto.define("constructor", Value::Object(id), false);
            let proto = self.alloc(proto)?;
            self.ctx
                .heap
                .get_mut(id)
                .define("prototype", Value::Object(proto), false);
        }
        Ok(Value::Object(id))
    }

    fn eval_class(&mut self, def: &Arc<ClassDef>) -> Eval<Value> {
        let parent = match &def.parent {
            Some(expr) => {
                let parent = self.eval(expr)?;
                if !self.is_constructor(&parent) {
                    let shown = inspect(&self.ctx.heap, &parent);
                    return self.throw_error(
                        "TypeError",
                        format!("Class extends value {} is not a constructor or null", shown),
                    );
                }
                Some(parent)
            }
            None => None,
        };
        let parent_proto = match &parent {
            Some(parent) => match self.get(parent, "prototype")? {
                Value::Object(proto) => proto,
                _ => self.ctx.intrinsics.object_proto,
            },
            None => self.ctx.intrinsics.object_proto,
        };

        let class_scope = self.open_scope(false)?;
        self.ctx.scopes.capture(class_scope);

        let constructor_def = match (&def.constructor, &parent) {
            (Some(constructor), _) => constructor.clone(),
            (None, Some(_)) => Arc::new(FunctionDef {
                name: def.name.clone(),
                params: vec![Param {
                    name: "args".to_string(),
                    default: None,
                    rest: true,
                }],
                body: FunctionBody::Block(vec![Stmt::Expr(Expr::SuperCall(vec![
                    Element::Spread(Expr::Ident("args".to_string())),
                ]))]),
                is_arrow: false,
            }),
            (None, None) => Arc::new(FunctionDef::empty_constructor(def.name.clone())),
        };

        let proto = self.alloc(Object::new(ObjectKind::Ordinary, Some(parent_proto)))?;
        let constructor_proto = match &parent {
            Some(Value::Object(parent)) => *parent,
            _ => self.ctx.intrinsics.function_proto,
        };
        let mut constructor = Object::new(
            ObjectKind::Function(Callable::Script {
                def: constructor_def,
                scope: class_scope,
                class: Some(def.clone()),
                parent: parent.clone(),
            }),
            Some(constructor_proto),
        );
        constructor.define("prototype", Value::Object(proto), false);
        if let Some(name) = &def.name {
            constructor.define("name", Value::str(name.as_str()), false);
        }
        let constructor = self.alloc(constructor)?;
        self.ctx
            .heap
            .get_mut(proto)
            .define("constructor", Value::Object(constructor), false);
        if let Some(name) = &def.name {
            let binding = Binding {
                value: Some(Value::Object(constructor)),
                mutable: false,
                lexical: true,
            };
            self.ctx.scopes.declare(class_scope, name.as_str(), binding);
        }

        for member in &def.members {
            let target = if member.is_static { constructor } else { proto };
            match &member.kind {
                MemberKind::Method(method) => {
                    let function = self.make_function(method.clone(), class_scope)?;
                    self.ctx
                        .heap
                        .get_mut(target)
                        .define(member.name.as_str(), function, false);
                }
                MemberKind::Accessor(kind, accessor) => {
                    let function = self.make_function(accessor.clone(), class_scope)?;
                    self.ctx.heap.get_mut(target).define_accessor(
                        member.name.as_str(),
                        *kind,
                        function,
                        false,
                    );
                }
                MemberKind::Field(init) if member.is_static => {
                    let value = match init {
                        Some(expr) => {
                            self.eval_with_this(expr, Value::Object(constructor), class_scope)?
                        }
                        None => Value::Undefined,
                    };
                    self.ctx
                        .heap
                        .get_mut(constructor)
                        .define(member.name.as_str(), value, true);
                }
                MemberKind::Field(_) => {}
            }
        }
        Ok(Value::Object(constructor))
    }

    fn eval_with_this(&mut self, expr: &Expr, this: Value, parent: ScopeId) -> Eval<Value> {
        let scope = self.open_scope_in(parent, true)?;
        self.ctx.scopes.declare(scope, THIS, Binding::var(this));
        self.with_scope(scope, |interp| interp.eval(expr))
    }

    /// Runs the instance field initializers of `class` against `instance`.
    fn init_fields(&mut self, class: ObjectId, instance: ObjectId) -> Eval<()> {
        let (def, scope) = match self.ctx.heap.get(class).callable() {
            Some(Callable::Script {
                class: Some(def),
                scope,
                ..
            }) => (def.clone(), *scope),
            _ => return Ok(()),
        };
        for member in &def.members {
            if let (false, MemberKind::Field(init)) = (member.is_static, &member.kind) {
                let value = match init {
                    Some(expr) => self.eval_with_this(expr, Value::Object(instance), scope)?,
                    None => Value::Undefined,
                };
                self.ctx
                    .heap
                    .get_mut(instance)
                    .define(member.name.as_str(), value, true);
            }
        }
        Ok(())
    }

    pub fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Object(id) => self.ctx.heap.get(*id).callable().is_some(),
            _ => false,
        }
    }

    fn is_constructor(&self, value: &Value) -> bool {
        match value {
            Value::Object(id) => match self.ctx.heap.get(*id).callable() {
                Some(Callable::Script { def, .. }) => !def.is_arrow,
                Some(Callable::Bound { target, .. }) => self.is_constructor(&Value::Object(*target)),
                Some(Callable::Native { .. }) => true,
                None => false,
            },
            _ => false,
        }
    }

    /// The `name` of a function object.
    pub fn function_name(&self, id: ObjectId) -> String {
        self.ctx
            .heap
            .get(id)
            .own("name")
            .and_then(Value::primitive_to_string)
            .unwrap_or_default()
    }

    fn enter<T>(&mut self, f: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        if self.depth >= MAX_CALL_DEPTH {
            return self.throw_error("RangeError", "Maximum call stack size exceeded");
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Calls `function` with `this` and `args`.
    pub fn call(&mut self, function: &Value, this: Value, args: Vec<Value>) -> Eval<Value> {
        let callable = match function {
            Value::Object(id) => self.ctx.heap.get(*id).callable().cloned(),
            _ => None,
        };
        let Some(callable) = callable else {
            let shown = inspect(&self.ctx.heap, function);
            return self.throw_error("TypeError", format!("{} is not a function", shown));
        };
        match callable {
            Callable::Native { func, .. } => self.enter(|interp| func(interp, this, args)),
            Callable::Bound {
                target,
                this,
                args: bound,
            } => {
                let mut all = bound;
                all.extend(args);
                self.call(&Value::Object(target), this, all)
            }
            Callable::Script {
                def, scope, class, ..
            } => {
                if class.is_some() {
                    let name = function
                        .as_object()
                        .map(|id| self.function_name(id))
                        .unwrap_or_default();
                    return self.throw_error(
                        "TypeError",
                        format!("Class constructor {} cannot be invoked without 'new'", name),
                    );
                }
                let frame = Frame {
                    this: Some(this),
                    class: None,
                };
                self.call_script(&def, scope, frame, args).map(|(value, _)| value)
            }
        }
    }

    /// Runs a script function body; returns its result and final `this`.
    fn call_script(
        &mut self,
        def: &Arc<FunctionDef>,
        closure: ScopeId,
        frame: Frame,
        args: Vec<Value>,
    ) -> Eval<(Value, Option<Value>)> {
        self.enter(|interp| {
            let scope = interp.open_scope_in(closure, true)?;
            interp.with_scope(scope, |interp| {
                if !def.is_arrow {
                    let binding = Binding {
                        value: frame.this,
                        mutable: true,
                        lexical: false,
                    };
                    interp.ctx.scopes.declare(scope, THIS, binding);
                }
                if let Some((class, proto)) = frame.class {
                    interp.ctx.scopes.declare(
                        scope,
                        CURRENT_CLASS,
                        Binding::var(Value::Object(class)),
                    );
                    interp.ctx.scopes.declare(
                        scope,
                        INSTANCE_PROTO,
                        Binding::var(Value::Object(proto)),
                    );
                }
                interp.bind_params(&def.params, args, scope)?;

                let result = match &def.body {
                    FunctionBody::Expr(expr) => interp.eval(expr)?,
                    FunctionBody::Block(body) => {
                        interp.instantiate(body, scope, true)?;
                        match interp.exec_statements(body)? {
                            Flow::Return(value) => value,
                            _ => Value::Undefined,
                        }
                    }
                };
                let this = interp
                    .ctx
                    .scopes
                    .get(scope)
                    .bindings
                    .get(THIS)
                    .and_then(|binding| binding.value.clone());
                Ok((result, this))
            })
        })
    }

    fn bind_params(&mut self, params: &[Param], args: Vec<Value>, scope: ScopeId) -> Eval<()> {
        for (index, param) in params.iter().enumerate() {
            let mut value = if param.rest {
                let rest = args.get(index..).map(<[Value]>::to_vec).unwrap_or_default();
                self.new_array(rest)?
            } else {
                args.get(index).cloned().unwrap_or_default()
            };
            if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                value = self.eval_named(default, &param.name)?;
            }
            self.ctx
                .scopes
                .declare(scope, param.name.as_str(), Binding::var(value));
        }
        Ok(())
    }

    /// `new function(...args)`.
    pub fn construct(&mut self, function: &Value, args: Vec<Value>) -> Eval<Value> {
        let Value::Object(id) = function else {
            let shown = inspect(&self.ctx.heap, function);
            return self.throw_error("TypeError", format!("{} is not a constructor", shown));
        };
        let proto = match self.get(function, "prototype")? {
            Value::Object(proto) => proto,
            _ => self.ctx.intrinsics.object_proto,
        };
        self.construct_with(*id, args, proto)
    }

    /// Constructs through `function`, giving the instance prototype `proto`.
    fn construct_with(&mut self, function: ObjectId, args: Vec<Value>, proto: ObjectId) -> Eval<Value> {
        let Some(callable) = self.ctx.heap.get(function).callable().cloned() else {
            return self.throw_error("TypeError", "value is not a constructor");
        };
        match callable {
            Callable::Native { func, .. } => {
                let result = self.enter(|interp| func(interp, Value::Undefined, args))?;
                if let Value::Object(instance) = &result {
                    let object = self.ctx.heap.get_mut(*instance);
                    if object.callable().is_none() {
                        object.proto = Some(proto);
                    }
                }
                Ok(result)
            }
            Callable::Bound {
                target, args: bound, ..
            } => {
                let mut all = bound;
                all.extend(args);
                self.construct_with(target, all, proto)
            }
            Callable::Script {
                def,
                scope,
                class,
                parent,
            } => {
                if def.is_arrow {
                    let name = self.function_name(function);
                    return self.throw_error("TypeError", format!("{} is not a constructor", name));
                }
                let class_frame = class.as_ref().map(|_| (function, proto));
                if class.is_some() && parent.is_some() {
                    let frame = Frame {
                        this: None,
                        class: class_frame,
                    };
                    let (result, this) = self.call_script(&def, scope, frame, args)?;
                    if let Value::Object(_) = result {
                        return Ok(result);
                    }
                    return match this {
                        Some(this) => Ok(this),
                        None => self.throw_error(
                            "ReferenceError",
                            "Must call super constructor in derived class before accessing 'this' or returning from derived constructor",
                        ),
                    };
                }
                let instance = self.alloc(Object::new(ObjectKind::Ordinary, Some(proto)))?;
                if class.is_some() {
                    self.init_fields(function, instance)?;
                }
                let frame = Frame {
                    this: Some(Value::Object(instance)),
                    class: class_frame,
                };
                let (result, _) = self.call_script(&def, scope, frame, args)?;
                match result {
                    Value::Object(_) => Ok(result),
                    _ => Ok(Value::Object(instance)),
                }
            }
        }
    }

    // ===============================================================================================
    // PROPERTIES
    // ===============================================================================================

    /// Property read with primitive wrappers and array/string indexing.
    pub fn get(&mut self, target: &Value, key: &str) -> Eval<Value> {
        let proto = match target {
            Value::Undefined | Value::Null => {
                let kind = if *target == Value::Null { "null" } else { "undefined" };
                return self.throw_error(
                    "TypeError",
                    format!("Cannot read properties of {} (reading '{}')", kind, key),
                );
            }
            Value::Bool(_) => self.ctx.intrinsics.boolean_proto,
            Value::Number(_) => self.ctx.intrinsics.number_proto,
            Value::Str(text) => {
                if key == "length" {
                    return Ok(Value::Number(text.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(text
                        .chars()
                        .nth(index)
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or_default());
                }
                self.ctx.intrinsics.string_proto
            }
            Value::Object(id) => {
                if let Some(value) = self.call_getter(*id, target, key)? {
                    return Ok(value);
                }
                return Ok(self.get_own_or_inherited(*id, key));
            }
        };
        if let Some(value) = self.call_getter(proto, target, key)? {
            return Ok(value);
        }
        Ok(self.ctx.heap.lookup(proto, key).cloned().unwrap_or_default())
    }

    /// Runs the getter for `key` when the property found from `start` is an
    /// accessor. A setter-only accessor reads as `undefined`.
    fn call_getter(&mut self, start: ObjectId, this: &Value, key: &str) -> Eval<Option<Value>> {
        let getter = match self.ctx.heap.lookup_accessor(start, key) {
            Some(accessor) => accessor.get.clone(),
            None => return Ok(None),
        };
        match getter {
            Some(getter) => self.call(&getter, this.clone(), Vec::new()).map(Some),
            None => Ok(Some(Value::Undefined)),
        }
    }

    fn get_own_or_inherited(&self, id: ObjectId, key: &str) -> Value {
        let object = self.ctx.heap.get(id);
        match &object.kind {
            ObjectKind::Array(items) => {
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                if let Some(index) = array_index(key) {
                    return items.get(index).cloned().unwrap_or_default();
                }
            }
            ObjectKind::Function(callable) if object.own(key).is_none() => match key {
                "length" => {
                    let arity = match callable {
                        Callable::Script { def, .. } => def.arity(),
                        _ => 0,
                    };
                    return Value::Number(arity as f64);
                }
                "name" => return Value::str(""),
                _ => {}
            },
            _ => {}
        }
        self.ctx.heap.lookup(id, key).cloned().unwrap_or_default()
    }

    /// Property write. Writes to primitives and frozen objects are ignored.
    pub fn set(&mut self, target: &Value, key: &str, value: Value) -> Eval<()> {
        let id = match target {
            Value::Undefined | Value::Null => {
                let kind = if *target == Value::Null { "null" } else { "undefined" };
                return self.throw_error(
                    "TypeError",
                    format!("Cannot set properties of {} (setting '{}')", kind, key),
                );
            }
            Value::Object(id) => *id,
            _ => return Ok(()),
        };
        // Assigning to a getter-only accessor is ignored, as in sloppy mode.
        if let Some(accessor) = self.ctx.heap.lookup_accessor(id, key) {
            if let Some(setter) = accessor.set.clone() {
                self.call(&setter, target.clone(), vec![value])?;
            }
            return Ok(());
        }
        let object = self.ctx.heap.get_mut(id);
        if object.frozen {
            return Ok(());
        }
        if let ObjectKind::Array(items) = &mut object.kind {
            let new_length = if key == "length" {
                Some(value.primitive_to_number().unwrap_or(f64::NAN))
            } else {
                array_index(key).map(|index| index as f64 + 1.0)
            };
            if let Some(length) = new_length {
                if !(0.0..=MAX_ARRAY_LENGTH as f64).contains(&length) || length.fract() != 0.0 {
                    return self.throw_error("RangeError", "Invalid array length");
                }
                let length = length as usize;
                if key == "length" {
                    items.resize(length, Value::Undefined);
                } else {
                    if items.len() < length {
                        items.resize(length, Value::Undefined);
                    }
                    items[length - 1] = value;
                }
                return Ok(());
            }
        }
        object.define(key, value, true);
        Ok(())
    }

    /// True when `key` is an own or inherited property of `id`.
    pub fn has_property(&self, id: ObjectId, key: &str) -> bool {
        let object = self.ctx.heap.get(id);
        if let ObjectKind::Array(items) = &object.kind {
            if key == "length" || array_index(key).map_or(false, |i| i < items.len()) {
                return true;
            }
        }
        self.ctx.heap.lookup(id, key).is_some()
    }

    /// Own enumerable string keys, in insertion order.
    pub fn own_keys(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Object(id) => {
                let object = self.ctx.heap.get(*id);
                let mut keys = Vec::new();
                if let ObjectKind::Array(items) = &object.kind {
                    keys.extend((0..items.len()).map(|index| index.to_string()));
                }
                keys.extend(
                    object
                        .properties
                        .iter()
                        .filter(|p| p.enumerable)
                        .map(|p| p.key.clone()),
                );
                keys
            }
            Value::Str(text) => (0..text.chars().count()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Own enumerable entries, in insertion order. Accessor properties
    /// contribute what their getter returns.
    pub fn own_entries(&mut self, value: &Value) -> Eval<Vec<(String, Value)>> {
        let keys = self.own_keys(value);
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let item = self.get(value, &key)?;
            entries.push((key, item));
        }
        Ok(entries)
    }

    /// The values a `for...of` loop or spread walks over.
    pub fn iterate(&mut self, value: &Value) -> Eval<Vec<Value>> {
        if let Value::Str(text) = value {
            return Ok(text.chars().map(|c| Value::Str(c.to_string())).collect());
        }
        if let Value::Object(id) = value {
            if let ObjectKind::Array(items) = &self.ctx.heap.get(*id).kind {
                return Ok(items.clone());
            }
        }
        let shown = inspect(&self.ctx.heap, value);
        self.throw_error("TypeError", format!("{} is not iterable", shown))
    }

    // ===============================================================================================
    // CONVERSIONS AND OPERATORS
    // ===============================================================================================

    pub fn type_of(&self, value: &Value) -> &'static str {
        if self.is_callable(value) {
            "function"
        } else {
            value.type_name()
        }
    }

    pub fn to_key(&mut self, value: &Value) -> Eval<String> {
        self.to_string(value)
    }

    pub fn to_string(&mut self, value: &Value) -> Eval<String> {
        match value {
            Value::Object(id) => self.object_to_string(*id),
            primitive => Ok(primitive.primitive_to_string().unwrap_or_default()),
        }
    }

    pub fn to_number(&mut self, value: &Value) -> Eval<f64> {
        match value.primitive_to_number() {
            Some(n) => Ok(n),
            None => {
                let text = self.to_string(value)?;
                Ok(super::value::string_to_number(&text))
            }
        }
    }

    fn to_primitive(&mut self, value: Value) -> Eval<Value> {
        match value {
            Value::Object(id) => Ok(Value::Str(self.object_to_string(id)?)),
            primitive => Ok(primitive),
        }
    }

    /// String conversion of an object, honouring a script-defined `toString`.
    fn object_to_string(&mut self, id: ObjectId) -> Eval<String> {
        let method = self.get_own_or_inherited(id, "toString");
        if let Value::Object(method_id) = &method {
            if let Some(Callable::Script { .. }) = self.ctx.heap.get(*method_id).callable() {
                let result = self.call(&method, Value::Object(id), Vec::new())?;
                if result.as_object().is_none() {
                    return self.to_string(&result);
                }
            }
        }
        self.default_object_string(id)
    }

    fn default_object_string(&mut self, id: ObjectId) -> Eval<String> {
        let object = self.ctx.heap.get(id);
        match &object.kind {
            ObjectKind::Array(items) => {
                if self.joining.contains(&id) {
                    return Ok(String::new());
                }
                let items = items.clone();
                self.joining.push(id);
                let joined = self.join_values(&items, ",");
                self.joining.pop();
                joined
            }
            ObjectKind::Function(_) => {
                let name = self.function_name(id);
                Ok(format!("function {}() {{ [native code] }}", name))
            }
            _ => {
                let error_proto = self.ctx.intrinsics.error_proto("Error");
                if matches!(object.kind, ObjectKind::Error)
                    || self.ctx.heap.inherits_from(id, error_proto)
                {
                    return Ok(self.describe_thrown(&Value::Object(id)));
                }
                Ok("[object Object]".to_string())
            }
        }
    }

    /// `Array.prototype.join` semantics: nullish items become empty.
    pub fn join_values(&mut self, items: &[Value], separator: &str) -> Eval<String> {
        let mut out = String::new();
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                out.push_str(separator);
            }
            if !item.is_nullish() {
                out.push_str(&self.to_string(item)?);
            }
            if out.len() > MAX_STRING_LENGTH {
                return self.throw_error("RangeError", "Invalid string length");
            }
        }
        Ok(out)
    }

    fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Eval<Value> {
        match op {
            BinaryOp::Add => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                    let mut text = self.to_string(&left)?;
                    text.push_str(&self.to_string(&right)?);
                    return self.check_string(text);
                }
                let l = self.to_number(&left)?;
                let r = self.to_number(&right)?;
                Ok(Value::Number(l + r))
            }
            BinaryOp::Sub => self.numeric(&left, &right, |l, r| l - r),
            BinaryOp::Mul => self.numeric(&left, &right, |l, r| l * r),
            BinaryOp::Div => self.numeric(&left, &right, |l, r| l / r),
            BinaryOp::Rem => self.numeric(&left, &right, |l, r| l % r),
            BinaryOp::Pow => self.numeric(&left, &right, |l, r| {
                if r.is_nan() {
                    f64::NAN
                } else {
                    l.powf(r)
                }
            }),
            BinaryOp::StrictEq => Ok(Value::Bool(strict_equals(&left, &right))),
            BinaryOp::StrictNe => Ok(Value::Bool(!strict_equals(&left, &right))),
            BinaryOp::LooseEq => Ok(Value::Bool(self.loose_equals(left, right)?)),
            BinaryOp::LooseNe => Ok(Value::Bool(!self.loose_equals(left, right)?)),
            BinaryOp::Lt => self.compare(left, right, |o| o == std::cmp::Ordering::Less),
            BinaryOp::Gt => self.compare(left, right, |o| o == std::cmp::Ordering::Greater),
            BinaryOp::Le => self.compare(left, right, |o| o != std::cmp::Ordering::Greater),
            BinaryOp::Ge => self.compare(left, right, |o| o != std::cmp::Ordering::Less),
            BinaryOp::InstanceOf => self.instance_of(left, right),
            BinaryOp::In => {
                let Value::Object(id) = right else {
                    let key = self.to_key(&left)?;
                    let shown = inspect(&self.ctx.heap, &right);
                    return self.throw_error(
                        "TypeError",
                        format!("Cannot use 'in' operator to search for '{}' in {}", key, shown),
                    );
                };
                let key = self.to_key(&left)?;
                Ok(Value::Bool(self.has_property(id, &key)))
            }
        }
    }

    fn numeric(&mut self, left: &Value, right: &Value, f: fn(f64, f64) -> f64) -> Eval<Value> {
        let l = self.to_number(left)?;
        let r = self.to_number(right)?;
        Ok(Value::Number(f(l, r)))
    }

    fn compare(
        &mut self,
        left: Value,
        right: Value,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> Eval<Value> {
        let left = self.to_primitive(left)?;
        let right = self.to_primitive(right)?;
        if let (Value::Str(l), Value::Str(r)) = (&left, &right) {
            return Ok(Value::Bool(accept(l.cmp(r))));
        }
        let l = self.to_number(&left)?;
        let r = self.to_number(&right)?;
        Ok(Value::Bool(l.partial_cmp(&r).map_or(false, accept)))
    }

    fn loose_equals(&mut self, left: Value, right: Value) -> Eval<bool> {
        match (&left, &right) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => Ok(true),
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => Ok(false),
            (Value::Object(a), Value::Object(b)) => Ok(a == b),
            (Value::Object(_), _) => {
                let left = self.to_primitive(left)?;
                self.loose_equals(left, right)
            }
            (_, Value::Object(_)) => {
                let right = self.to_primitive(right)?;
                self.loose_equals(left, right)
            }
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            _ => {
                let l = self.to_number(&left)?;
                let r = self.to_number(&right)?;
                Ok(l == r)
            }
        }
    }

    fn instance_of(&mut self, left: Value, right: Value) -> Eval<Value> {
        if !self.is_callable(&right) {
            return self.throw_error("TypeError", "Right-hand side of 'instanceof' is not callable");
        }
        let mut constructor = right;
        while let Some(Callable::Bound { target, .. }) = constructor
            .as_object()
            .and_then(|id| self.ctx.heap.get(id).callable())
        {
            constructor = Value::Object(*target);
        }
        let Value::Object(instance) = left else {
            return Ok(Value::Bool(false));
        };
        match self.get(&constructor, "prototype")? {
            Value::Object(proto) => Ok(Value::Bool(self.ctx.heap.inherits_from(instance, proto))),
            _ => Ok(Value::Bool(false)),
        }
    }
}

// ===================================================================================================
// HELPERS
// ===================================================================================================

fn short_circuits(op: LogicalOp, left: &Value) -> bool {
    match op {
        LogicalOp::And => !left.truthy(),
        LogicalOp::Or => left.truthy(),
        LogicalOp::Nullish => !left.is_nullish(),
    }
}

/// Source-like rendering of a callee for "is not a function" messages.
fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object,
            key: MemberKey::Named(name),
            ..
        } => format!("{}.{}", describe_callee(object), name),
        Expr::Member { object, .. } => format!("{}[...]", describe_callee(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe_callee(callee)),
        Expr::Str(text) => format!("\"{}\"", text),
        Expr::Number(n) => number_to_string(*n),
        _ => "expression".to_string(),
    }
}

/// `let`, `const` and `class` names declared directly in `body`.
fn lexical_names(body: &[Stmt]) -> Vec<(&str, DeclKind)> {
    let mut names = Vec::new();
    for stmt in body {
        match stmt {
            Stmt::VarDecl { kind, declarators } if kind.is_lexical() => {
                names.extend(declarators.iter().map(|d| (d.name.as_str(), *kind)));
            }
            Stmt::Class(def) => {
                if let Some(name) = &def.name {
                    names.push((name.as_str(), DeclKind::Let));
                }
            }
            _ => {}
        }
    }
    names
}

/// `var` names declared anywhere in `body` outside nested functions.
fn collect_vars<'s>(body: &'s [Stmt], out: &mut Vec<&'s str>) {
    for stmt in body {
        collect_stmt_vars(stmt, out);
    }
}

fn collect_stmt_vars<'s>(stmt: &'s Stmt, out: &mut Vec<&'s str>) {
    match stmt {
        Stmt::VarDecl {
            kind: DeclKind::Var,
            declarators,
        } => {
            for declarator in declarators {
                if !out.contains(&declarator.name.as_str()) {
                    out.push(&declarator.name);
                }
            }
        }
        Stmt::If {
            consequent,
            alternate,
            ..
        } => {
            collect_stmt_vars(consequent, out);
            if let Some(alternate) = alternate {
                collect_stmt_vars(alternate, out);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_stmt_vars(body, out),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_stmt_vars(init, out);
            }
            collect_stmt_vars(body, out);
        }
        Stmt::ForOf {
            kind, name, body, ..
        } => {
            if *kind == DeclKind::Var && !out.contains(&name.as_str()) {
                out.push(name);
            }
            collect_stmt_vars(body, out);
        }
        Stmt::Switch { cases, .. } => {
            for case in cases {
                collect_vars(&case.body, out);
            }
        }
        Stmt::Try {
            block,
            handler,
            finalizer,
        } => {
            collect_vars(block, out);
            if let Some(handler) = handler {
                collect_vars(&handler.body, out);
            }
            if let Some(finalizer) = finalizer {
                collect_vars(finalizer, out);
            }
        }
        Stmt::Block(body) => collect_vars(body, out),
        _ => {}
    }
}

fn needs_scope(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::VarDecl { kind, .. } => kind.is_lexical(),
        Stmt::Class(_) | Stmt::Function(_) => true,
        _ => false,
    })
}

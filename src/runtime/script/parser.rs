//! Script parser.
//!
//! Converts snippet source into the syntax tree in [`super::ast`]. Purely
//! syntactic: scoping, hoisting and early errors belong to the evaluator.

use std::fmt;
use std::sync::Arc;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use super::ast::*;
use super::value::number_to_string;

#[derive(Parser)]
#[grammar = "runtime/script/grammar.pest"]
struct ScriptParser;

/// A syntax error, reported to the snippet as a thrown `SyntaxError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn malformed(rule: Rule) -> Self {
        Self::new(format!("Malformed {:?}", rule))
    }

    fn from_pest(error: pest::error::Error<Rule>) -> Self {
        let (line, column) = match error.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        Self::unexpected(line, column)
    }

    fn unexpected(line: usize, column: usize) -> Self {
        Self::new(format!(
            "Unexpected token at line {}, column {}",
            line, column
        ))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

type Build<T> = Result<T, ParseError>;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parses a whole snippet into its statement list.
pub fn parse_program(source: &str) -> Build<Block> {
    let mut pairs =
        ScriptParser::parse(Rule::program, source).map_err(ParseError::from_pest)?;
    let program = pairs
        .next()
        .ok_or_else(|| ParseError::malformed(Rule::program))?;
    check_terminators(&program, source)?;
    program
        .into_inner()
        .filter(|p| p.as_rule() == Rule::statement)
        .map(build_statement)
        .collect()
}

// ============================================================================
// STATEMENT TERMINATORS
// ============================================================================

/// Statements that must end at `;`, `}`, the end of input or a line break.
fn needs_terminator(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::var_decl
            | Rule::return_stmt
            | Rule::throw_stmt
            | Rule::break_stmt
            | Rule::continue_stmt
            | Rule::expr_stmt
            | Rule::class_field
    )
}

/// Rejects a statement followed by another token on the same line.
fn check_terminators(program: &Pair<'_, Rule>, source: &str) -> Build<()> {
    for pair in program.clone().into_inner().flatten() {
        let node = match pair.as_rule() {
            Rule::statement => match pair.into_inner().next() {
                Some(node) => node,
                None => continue,
            },
            Rule::class_field => pair,
            _ => continue,
        };
        if !needs_terminator(node.as_rule()) {
            continue;
        }
        let span_end = node.as_span().end();
        let last_token = node
            .clone()
            .into_inner()
            .flatten()
            .last()
            .map_or(span_end, |token| token.as_span().end());
        if let Some(offset) = unterminated_at(source, last_token, span_end) {
            let (line, column) = pest::Position::new(source, offset)
                .map_or((0, 0), |position| position.line_col());
            return Err(ParseError::unexpected(line, column));
        }
    }
    Ok(())
}

/// Scans forward from the end of a statement's last named token. Anything
/// left inside the statement's span is closing punctuation. Returns the
/// offset of the first token past the span when nothing separates the two.
fn unterminated_at(source: &str, from: usize, span_end: usize) -> Option<usize> {
    let mut line_break = false;
    let mut pos = from;
    while let Some(c) = source[pos..].chars().next() {
        let rest = &source[pos..];
        if rest.starts_with("//") {
            pos += rest.find('\n').unwrap_or(rest.len());
            line_break = true;
            continue;
        }
        if rest.starts_with("/*") {
            let close = rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
            line_break |= rest[..close].contains('\n');
            pos += close;
            continue;
        }
        match c {
            '\n' | '\r' | '\u{2028}' | '\u{2029}' => line_break = true,
            c if c.is_whitespace() || c == '\u{feff}' => {}
            _ if pos < span_end => line_break = false,
            ';' | '}' => return None,
            _ if line_break => return None,
            _ => return Some(pos),
        }
        pos += c.len_utf8();
    }
    None
}

// ============================================================================
// HELPERS
// ============================================================================

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_function
            | Rule::kw_class
            | Rule::kw_extends
            | Rule::kw_static
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_do
            | Rule::kw_for
            | Rule::kw_of
            | Rule::kw_switch
            | Rule::kw_case
            | Rule::kw_default
            | Rule::kw_try
            | Rule::kw_catch
            | Rule::kw_finally
            | Rule::kw_return
            | Rule::kw_throw
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_new
            | Rule::kw_super
    )
}

/// Children of `pair`, without keyword tokens.
fn inner<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn first(pair: Pair<'_, Rule>) -> Build<Pair<'_, Rule>> {
    let rule = pair.as_rule();
    inner(pair).next().ok_or_else(|| ParseError::malformed(rule))
}

fn next<'i>(parts: &mut impl Iterator<Item = Pair<'i, Rule>>, rule: Rule) -> Build<Pair<'i, Rule>> {
    parts.next().ok_or_else(|| ParseError::malformed(rule))
}

fn has_child(pair: &Pair<'_, Rule>, rule: Rule) -> bool {
    pair.clone().into_inner().any(|p| p.as_rule() == rule)
}

// ============================================================================
// STATEMENTS
// ============================================================================

fn build_statement(pair: Pair<'_, Rule>) -> Build<Stmt> {
    let node = first(pair)?;
    let rule = node.as_rule();
    match rule {
        Rule::block => Ok(Stmt::Block(build_block(node)?)),
        Rule::function_decl => Ok(Stmt::Function(Arc::new(build_function(node)?))),
        Rule::class_decl => Ok(Stmt::Class(Arc::new(build_class(node)?))),
        Rule::if_stmt => {
            let mut parts = inner(node);
            let test = build_expr(next(&mut parts, rule)?)?;
            let consequent = Box::new(build_statement(next(&mut parts, rule)?)?);
            let alternate = match parts.next() {
                Some(clause) => Some(Box::new(build_statement(first(clause)?)?)),
                None => None,
            };
            Ok(Stmt::If {
                test,
                consequent,
                alternate,
            })
        }
        Rule::while_stmt => {
            let mut parts = inner(node);
            let test = build_expr(next(&mut parts, rule)?)?;
            let body = Box::new(build_statement(next(&mut parts, rule)?)?);
            Ok(Stmt::While { test, body })
        }
        Rule::do_while_stmt => {
            let mut parts = inner(node);
            let body = Box::new(build_statement(next(&mut parts, rule)?)?);
            let test = build_expr(next(&mut parts, rule)?)?;
            Ok(Stmt::DoWhile { body, test })
        }
        Rule::for_stmt => build_for(node),
        Rule::for_of_stmt => {
            let mut parts = inner(node);
            let kind = decl_kind(next(&mut parts, rule)?.as_str());
            let name = next(&mut parts, rule)?.as_str().to_string();
            let iterable = build_expr(next(&mut parts, rule)?)?;
            let body = Box::new(build_statement(next(&mut parts, rule)?)?);
            Ok(Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            })
        }
        Rule::switch_stmt => build_switch(node),
        Rule::try_stmt => build_try(node),
        Rule::var_decl => build_var_decl(node),
        Rule::return_stmt => {
            let value = inner(node).next().map(build_expr).transpose()?;
            Ok(Stmt::Return(value))
        }
        Rule::throw_stmt => Ok(Stmt::Throw(build_expr(first(node)?)?)),
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::empty_stmt => Ok(Stmt::Empty),
        Rule::expr_stmt => Ok(Stmt::Expr(build_expr(first(node)?)?)),
        // Labels are accepted and ignored; `break label` is not supported.
        Rule::labeled_stmt => {
            let mut parts = inner(node);
            next(&mut parts, rule)?;
            build_statement(next(&mut parts, rule)?)
        }
        other => Err(ParseError::malformed(other)),
    }
}

fn build_block(pair: Pair<'_, Rule>) -> Build<Block> {
    inner(pair).map(build_statement).collect()
}

fn decl_kind(text: &str) -> DeclKind {
    match text {
        "let" => DeclKind::Let,
        "const" => DeclKind::Const,
        _ => DeclKind::Var,
    }
}

fn build_var_decl(pair: Pair<'_, Rule>) -> Build<Stmt> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let kind = decl_kind(next(&mut parts, rule)?.as_str());
    let declarators = parts
        .map(|declarator| {
            let mut items = inner(declarator);
            let name = next(&mut items, Rule::declarator)?.as_str().to_string();
            let init = items.next().map(build_expr).transpose()?;
            Ok(Declarator { name, init })
        })
        .collect::<Build<Vec<_>>>()?;
    Ok(Stmt::VarDecl { kind, declarators })
}

fn build_for(pair: Pair<'_, Rule>) -> Build<Stmt> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let init = match inner(next(&mut parts, rule)?).next() {
        Some(node) if node.as_rule() == Rule::var_decl => Some(Box::new(build_var_decl(node)?)),
        Some(node) => Some(Box::new(Stmt::Expr(build_expr(node)?))),
        None => None,
    };
    let test = inner(next(&mut parts, rule)?).next().map(build_expr).transpose()?;
    let update = inner(next(&mut parts, rule)?).next().map(build_expr).transpose()?;
    let body = Box::new(build_statement(next(&mut parts, rule)?)?);
    Ok(Stmt::For {
        init,
        test,
        update,
        body,
    })
}

fn build_switch(pair: Pair<'_, Rule>) -> Build<Stmt> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let discriminant = build_expr(next(&mut parts, rule)?)?;
    let cases = parts
        .map(|case| {
            let is_default = has_child(&case, Rule::kw_default);
            let mut items = inner(case);
            let test = if is_default {
                None
            } else {
                Some(build_expr(next(&mut items, Rule::switch_case)?)?)
            };
            let body = items.map(build_statement).collect::<Build<Block>>()?;
            Ok(SwitchCase { test, body })
        })
        .collect::<Build<Vec<_>>>()?;
    Ok(Stmt::Switch {
        discriminant,
        cases,
    })
}

fn build_try(pair: Pair<'_, Rule>) -> Build<Stmt> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let block = build_block(next(&mut parts, rule)?)?;
    let mut handler = None;
    let mut finalizer = None;
    for clause in parts {
        match clause.as_rule() {
            Rule::catch_clause => {
                let mut param = None;
                let mut body = Vec::new();
                for item in inner(clause) {
                    match item.as_rule() {
                        Rule::ident => param = Some(item.as_str().to_string()),
                        _ => body = build_block(item)?,
                    }
                }
                handler = Some(CatchClause { param, body });
            }
            _ => finalizer = Some(build_block(first(clause)?)?),
        }
    }
    Ok(Stmt::Try {
        block,
        handler,
        finalizer,
    })
}

// ============================================================================
// FUNCTIONS AND CLASSES
// ============================================================================

fn build_function(pair: Pair<'_, Rule>) -> Build<FunctionDef> {
    let mut def = FunctionDef::empty_constructor(None);
    for part in inner(pair) {
        match part.as_rule() {
            Rule::ident => def.name = Some(part.as_str().to_string()),
            Rule::params => def.params = build_params(part)?,
            _ => def.body = FunctionBody::Block(build_block(part)?),
        }
    }
    Ok(def)
}

fn build_params(pair: Pair<'_, Rule>) -> Build<Vec<Param>> {
    inner(pair)
        .map(|param| {
            let rule = param.as_rule();
            let mut parts = inner(param);
            let head = next(&mut parts, rule)?;
            if head.as_rule() == Rule::rest_param {
                return Ok(Param {
                    name: first(head)?.as_str().to_string(),
                    default: None,
                    rest: true,
                });
            }
            let default = parts.next().map(build_expr).transpose()?;
            Ok(Param {
                name: head.as_str().to_string(),
                default,
                rest: false,
            })
        })
        .collect()
}

fn build_arrow(pair: Pair<'_, Rule>) -> Build<Expr> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let head = first(next(&mut parts, rule)?)?;
    let params = match head.as_rule() {
        Rule::ident => vec![Param {
            name: head.as_str().to_string(),
            default: None,
            rest: false,
        }],
        _ => build_params(head)?,
    };
    let body_pair = next(&mut parts, rule)?;
    let body = match body_pair.as_rule() {
        Rule::block => FunctionBody::Block(build_block(body_pair)?),
        _ => FunctionBody::Expr(Box::new(build_expr(body_pair)?)),
    };
    Ok(Expr::Function(Arc::new(FunctionDef {
        name: None,
        params,
        body,
        is_arrow: true,
    })))
}

fn build_class(pair: Pair<'_, Rule>) -> Build<ClassDef> {
    let mut def = ClassDef {
        name: None,
        parent: None,
        constructor: None,
        members: Vec::new(),
    };
    for part in inner(pair) {
        match part.as_rule() {
            Rule::ident => def.name = Some(part.as_str().to_string()),
            Rule::class_heritage => def.parent = Some(build_expr(first(part)?)?),
            _ => {
                for member in inner(part) {
                    build_class_member(member, &mut def)?;
                }
            }
        }
    }
    Ok(def)
}

fn build_class_member(pair: Pair<'_, Rule>, class: &mut ClassDef) -> Build<()> {
    let Some(node) = inner(pair).next() else {
        return Ok(());
    };
    let rule = node.as_rule();
    let is_static = has_child(&node, Rule::kw_static);
    let mut parts = inner(node);
    let accessor = match rule {
        Rule::class_accessor => Some(accessor_kind(next(&mut parts, rule)?.as_str())),
        _ => None,
    };
    let name = next(&mut parts, rule)?.as_str().to_string();

    if let Some(kind) = accessor {
        let params = build_params(next(&mut parts, rule)?)?;
        check_accessor_params(kind, &params)?;
        let body = FunctionBody::Block(build_block(next(&mut parts, rule)?)?);
        let function = FunctionDef {
            name: Some(name.clone()),
            params,
            body,
            is_arrow: false,
        };
        class.members.push(ClassMember {
            name,
            is_static,
            kind: MemberKind::Accessor(kind, Arc::new(function)),
        });
        return Ok(());
    }

    if rule == Rule::class_method {
        let params = build_params(next(&mut parts, rule)?)?;
        let body = FunctionBody::Block(build_block(next(&mut parts, rule)?)?);
        if name == "constructor" && !is_static {
            class.constructor = Some(Arc::new(FunctionDef {
                name: class.name.clone(),
                params,
                body,
                is_arrow: false,
            }));
            return Ok(());
        }
        let method = FunctionDef {
            name: Some(name.clone()),
            params,
            body,
            is_arrow: false,
        };
        class.members.push(ClassMember {
            name,
            is_static,
            kind: MemberKind::Method(Arc::new(method)),
        });
        return Ok(());
    }

    let init = parts.next().map(build_expr).transpose()?;
    class.members.push(ClassMember {
        name,
        is_static,
        kind: MemberKind::Field(init),
    });
    Ok(())
}

fn accessor_kind(text: &str) -> AccessorKind {
    match text {
        "set" => AccessorKind::Set,
        _ => AccessorKind::Get,
    }
}

fn check_accessor_params(kind: AccessorKind, params: &[Param]) -> Build<()> {
    match kind {
        AccessorKind::Get if !params.is_empty() => {
            Err(ParseError::new("Getter must not have any formal parameters."))
        }
        AccessorKind::Set if params.len() != 1 || params[0].rest => {
            Err(ParseError::new("Setter must have exactly one formal parameter."))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

fn build_expr(pair: Pair<'_, Rule>) -> Build<Expr> {
    let rule = pair.as_rule();
    match rule {
        Rule::expr => {
            let mut items = inner(pair).map(build_expr).collect::<Build<Vec<_>>>()?;
            if items.len() == 1 {
                return items.pop().ok_or_else(|| ParseError::malformed(rule));
            }
            Ok(Expr::Sequence(items))
        }
        Rule::assignment => {
            let mut parts = inner(pair);
            let head = next(&mut parts, rule)?;
            let Some(op) = parts.next() else {
                return build_expr(head);
            };
            let target = build_expr(head)?;
            if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
                return Err(ParseError::new("Invalid left-hand side in assignment"));
            }
            let value = build_expr(next(&mut parts, rule)?)?;
            Ok(Expr::Assign {
                op: assign_op(op.as_str())?,
                target: Box::new(target),
                value: Box::new(value),
            })
        }
        Rule::arrow_fn => build_arrow(pair),
        Rule::conditional => {
            let mut parts = inner(pair);
            let test = build_expr(next(&mut parts, rule)?)?;
            let Some(consequent) = parts.next() else {
                return Ok(test);
            };
            let consequent = build_expr(consequent)?;
            let alternate = build_expr(next(&mut parts, rule)?)?;
            Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            })
        }
        Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::relational
        | Rule::additive
        | Rule::multiplicative => build_chain(pair),
        Rule::exponent => {
            let mut parts = inner(pair);
            let base = build_expr(next(&mut parts, rule)?)?;
            if parts.next().is_none() {
                return Ok(base);
            }
            let power = build_expr(next(&mut parts, rule)?)?;
            Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(power),
            })
        }
        Rule::unary => {
            let mut parts = inner(pair);
            let head = next(&mut parts, rule)?;
            if head.as_rule() != Rule::unary_op {
                return build_expr(head);
            }
            let operand = build_expr(next(&mut parts, rule)?)?;
            build_unary(head.as_str(), operand)
        }
        Rule::postfix => {
            let mut parts = inner(pair);
            let target = build_expr(next(&mut parts, rule)?)?;
            let Some(op) = parts.next() else {
                return Ok(target);
            };
            update(op.as_str(), false, target)
        }
        Rule::call_member => build_call_member(pair),
        Rule::new_expr => {
            let mut parts = inner(pair);
            let target = next(&mut parts, rule)?;
            let mut target_parts = inner(target);
            let mut callee = build_expr(next(&mut target_parts, Rule::new_target)?)?;
            for suffix in target_parts {
                callee = apply_suffix(callee, suffix)?;
            }
            let args = match parts.next() {
                Some(args) => build_elements(args)?,
                None => Vec::new(),
            };
            Ok(Expr::New {
                callee: Box::new(callee),
                args,
            })
        }
        Rule::super_call => Ok(Expr::SuperCall(build_elements(first(pair)?)?)),
        Rule::primary | Rule::paren_expr => build_expr(first(pair)?),
        Rule::number => parse_number(pair.as_str()).map(Expr::Number),
        Rule::string => Ok(Expr::Str(unquote_string(pair.as_str())?)),
        Rule::template => build_template(pair),
        Rule::boolean => Ok(Expr::Bool(pair.as_str() == "true")),
        Rule::null_lit => Ok(Expr::Null),
        Rule::this_lit => Ok(Expr::This),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::array_lit => Ok(Expr::Array(
            inner(pair).map(build_element).collect::<Build<Vec<_>>>()?,
        )),
        Rule::object_lit => build_object(pair),
        Rule::function_expr => Ok(Expr::Function(Arc::new(build_function(pair)?))),
        Rule::class_expr => Ok(Expr::Class(Arc::new(build_class(pair)?))),
        other => Err(ParseError::malformed(other)),
    }
}

/// Folds `operand (op operand)*` left to right.
fn build_chain(pair: Pair<'_, Rule>) -> Build<Expr> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let mut acc = build_expr(next(&mut parts, rule)?)?;
    while let Some(op) = parts.next() {
        let right = build_expr(next(&mut parts, rule)?)?;
        acc = match op.as_rule() {
            Rule::or_op | Rule::and_op => Expr::Logical {
                op: logical_op(op.as_str())?,
                left: Box::new(acc),
                right: Box::new(right),
            },
            _ => Expr::Binary {
                op: binary_op(op.as_str())?,
                left: Box::new(acc),
                right: Box::new(right),
            },
        };
    }
    Ok(acc)
}

fn build_call_member(pair: Pair<'_, Rule>) -> Build<Expr> {
    let rule = pair.as_rule();
    let mut parts = inner(pair);
    let mut acc = build_expr(next(&mut parts, rule)?)?;
    for suffix in parts {
        acc = apply_suffix(acc, suffix)?;
    }
    Ok(acc)
}

fn apply_suffix(object: Expr, suffix: Pair<'_, Rule>) -> Build<Expr> {
    match suffix.as_rule() {
        Rule::call_args => Ok(Expr::Call {
            callee: Box::new(object),
            args: build_elements(suffix)?,
        }),
        Rule::member_dot | Rule::opt_member => {
            let optional = suffix.as_rule() == Rule::opt_member;
            Ok(Expr::Member {
                object: Box::new(object),
                key: MemberKey::Named(first(suffix)?.as_str().to_string()),
                optional,
            })
        }
        Rule::member_index => Ok(Expr::Member {
            object: Box::new(object),
            key: MemberKey::Computed(Box::new(build_expr(first(suffix)?)?)),
            optional: false,
        }),
        other => Err(ParseError::malformed(other)),
    }
}

fn build_elements(pair: Pair<'_, Rule>) -> Build<Vec<Element>> {
    inner(pair).map(build_element).collect()
}

fn build_element(pair: Pair<'_, Rule>) -> Build<Element> {
    let node = first(pair)?;
    match node.as_rule() {
        Rule::spread => Ok(Element::Spread(build_expr(first(node)?)?)),
        _ => Ok(Element::Item(build_expr(node)?)),
    }
}

fn build_object(pair: Pair<'_, Rule>) -> Build<Expr> {
    let props = inner(pair)
        .map(|property| {
            let node = first(property)?;
            let rule = node.as_rule();
            match rule {
                Rule::spread => Ok(ObjectProp::Spread(build_expr(first(node)?)?)),
                Rule::shorthand => {
                    let name = node.as_str().to_string();
                    Ok(ObjectProp::KeyValue(
                        PropKey::Named(name.clone()),
                        Expr::Ident(name),
                    ))
                }
                Rule::key_value => {
                    let mut parts = inner(node);
                    let key = build_prop_key(next(&mut parts, rule)?)?;
                    let value = build_expr(next(&mut parts, rule)?)?;
                    Ok(ObjectProp::KeyValue(key, value))
                }
                Rule::accessor_prop => {
                    let mut parts = inner(node);
                    let kind = accessor_kind(next(&mut parts, rule)?.as_str());
                    let key = build_prop_key(next(&mut parts, rule)?)?;
                    let params = build_params(next(&mut parts, rule)?)?;
                    check_accessor_params(kind, &params)?;
                    let body = FunctionBody::Block(build_block(next(&mut parts, rule)?)?);
                    let name = match &key {
                        PropKey::Named(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    let function = FunctionDef {
                        name,
                        params,
                        body,
                        is_arrow: false,
                    };
                    Ok(ObjectProp::Accessor(key, kind, Arc::new(function)))
                }
                _ => {
                    let mut parts = inner(node);
                    let key = build_prop_key(next(&mut parts, rule)?)?;
                    let params = build_params(next(&mut parts, rule)?)?;
                    let body = FunctionBody::Block(build_block(next(&mut parts, rule)?)?);
                    let name = match &key {
                        PropKey::Named(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    let method = FunctionDef {
                        name,
                        params,
                        body,
                        is_arrow: false,
                    };
                    Ok(ObjectProp::KeyValue(key, Expr::Function(Arc::new(method))))
                }
            }
        })
        .collect::<Build<Vec<_>>>()?;
    Ok(Expr::Object(props))
}

fn build_prop_key(pair: Pair<'_, Rule>) -> Build<PropKey> {
    let node = first(pair)?;
    match node.as_rule() {
        Rule::string => Ok(PropKey::Named(unquote_string(node.as_str())?)),
        Rule::number => Ok(PropKey::Named(number_to_string(parse_number(
            node.as_str(),
        )?))),
        Rule::computed_key => Ok(PropKey::Computed(Box::new(build_expr(first(node)?)?))),
        _ => Ok(PropKey::Named(node.as_str().to_string())),
    }
}

fn build_template(pair: Pair<'_, Rule>) -> Build<Expr> {
    let parts = inner(pair)
        .map(|part| match part.as_rule() {
            Rule::template_text => Ok(TemplatePart::Text(unescape(part.as_str())?)),
            _ => Ok(TemplatePart::Expr(build_expr(first(part)?)?)),
        })
        .collect::<Build<Vec<_>>>()?;
    Ok(Expr::Template(parts))
}

// ============================================================================
// OPERATORS AND LITERALS
// ============================================================================

fn build_unary(op: &str, operand: Expr) -> Build<Expr> {
    let op = match op {
        "++" | "--" => return update(op, true, operand),
        "!" => UnaryOp::Not,
        "-" => UnaryOp::Neg,
        "+" => UnaryOp::Plus,
        "typeof" => UnaryOp::TypeOf,
        "void" => UnaryOp::Void,
        "delete" => UnaryOp::Delete,
        other => return Err(ParseError::new(format!("Unknown operator '{}'", other))),
    };
    Ok(Expr::Unary {
        op,
        operand: Box::new(operand),
    })
}

fn update(op: &str, prefix: bool, target: Expr) -> Build<Expr> {
    if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
        return Err(ParseError::new(
            "Invalid left-hand side expression in update operation",
        ));
    }
    let op = if op == "++" {
        UpdateOp::Increment
    } else {
        UpdateOp::Decrement
    };
    Ok(Expr::Update {
        op,
        prefix,
        target: Box::new(target),
    })
}

fn binary_op(text: &str) -> Build<BinaryOp> {
    Ok(match text {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "**" => BinaryOp::Pow,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNe,
        "==" => BinaryOp::LooseEq,
        "!=" => BinaryOp::LooseNe,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "<=" => BinaryOp::Le,
        ">=" => BinaryOp::Ge,
        "instanceof" => BinaryOp::InstanceOf,
        "in" => BinaryOp::In,
        other => return Err(ParseError::new(format!("Unknown operator '{}'", other))),
    })
}

fn logical_op(text: &str) -> Build<LogicalOp> {
    Ok(match text {
        "&&" => LogicalOp::And,
        "||" => LogicalOp::Or,
        "??" => LogicalOp::Nullish,
        other => return Err(ParseError::new(format!("Unknown operator '{}'", other))),
    })
}

fn assign_op(text: &str) -> Build<AssignOp> {
    Ok(match text {
        "=" => AssignOp::Assign,
        "&&=" => AssignOp::Logical(LogicalOp::And),
        "||=" => AssignOp::Logical(LogicalOp::Or),
        "??=" => AssignOp::Logical(LogicalOp::Nullish),
        compound => AssignOp::Compound(binary_op(compound.trim_end_matches('='))?),
    })
}

fn parse_number(text: &str) -> Build<f64> {
    let cleaned = text.replace('_', "");
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .map_err(|_| ParseError::new(format!("Invalid number '{}'", text)));
    }
    cleaned
        .parse::<f64>()
        .map_err(|_| ParseError::new(format!("Invalid number '{}'", text)))
}

fn unquote_string(raw: &str) -> Build<String> {
    if raw.len() < 2 {
        return Err(ParseError::new("Invalid or unexpected token"));
    }
    unescape(&raw[1..raw.len() - 1])
}

/// Resolves backslash escapes in string and template text.
fn unescape(raw: &str) -> Build<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(&escaped) = chars.get(i) else {
            out.push('\\');
            break;
        };
        i += 1;
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let code = hex_digits(&chars, i, 2)?;
                i += 2;
                out.push(code);
            }
            'u' if chars.get(i) == Some(&'{') => {
                let end = chars[i..]
                    .iter()
                    .position(|&c| c == '}')
                    .ok_or_else(|| ParseError::new("Invalid Unicode escape sequence"))?;
                let digits: String = chars[i + 1..i + end].iter().collect();
                out.push(code_point(&digits)?);
                i += end + 1;
            }
            'u' => {
                let code = hex_digits(&chars, i, 4)?;
                i += 4;
                out.push(code);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn hex_digits(chars: &[char], start: usize, count: usize) -> Build<char> {
    let digits: String = chars.iter().skip(start).take(count).collect();
    if digits.len() != count {
        return Err(ParseError::new("Invalid hexadecimal escape sequence"));
    }
    code_point(&digits)
}

fn code_point(digits: &str) -> Build<char> {
    u32::from_str_radix(digits, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ParseError::new("Invalid Unicode escape sequence"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_expr(source: &str) -> Expr {
        match parse_program(source).unwrap().remove(0) {
            Stmt::Expr(expr) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parses_declarations_without_semicolons() {
        let program = parse_program("let a = 1\nconst b = 'x'\nvar c").unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(
            &program[0],
            Stmt::VarDecl { kind: DeclKind::Let, declarators } if declarators[0].name == "a"
        ));
        assert!(matches!(&program[2], Stmt::VarDecl { kind: DeclKind::Var, .. }));
    }

    #[test]
    fn keywords_do_not_swallow_identifier_prefixes() {
        let program = parse_program("letter = 2; newValue = letter;").unwrap();
        assert!(matches!(
            &program[0],
            Stmt::Expr(Expr::Assign { target, .. }) if **target == Expr::Ident("letter".into())
        ));
    }

    #[test]
    fn binary_operators_respect_precedence() {
        let expr = single_expr("1 + 2 * 3");
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary expression");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn arrow_functions_with_concise_bodies() {
        let program = parse_program("const add = (a, b = 2) => a + b").unwrap();
        let Stmt::VarDecl { declarators, .. } = &program[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Function(def)) = &declarators[0].init else {
            panic!("expected arrow function");
        };
        assert!(def.is_arrow);
        assert_eq!(def.arity(), 1);
        assert!(matches!(def.body, FunctionBody::Expr(_)));
    }

    #[test]
    fn member_calls_chain_left_to_right() {
        let expr = single_expr("console.log(a.b[0])");
        let Expr::Call { callee, args } = expr else {
            panic!("expected call");
        };
        assert!(matches!(*callee, Expr::Member { key: MemberKey::Named(ref n), .. } if n == "log"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn classes_collect_constructor_methods_and_fields() {
        let program = parse_program(
            "class Dog extends Animal {\n  static count = 0;\n  constructor(name) { super(name); }\n  speak() { return 'woof'; }\n}",
        )
        .unwrap();
        let Stmt::Class(class) = &program[0] else {
            panic!("expected class");
        };
        assert_eq!(class.name.as_deref(), Some("Dog"));
        assert!(class.parent.is_some());
        assert!(class.constructor.is_some());
        assert_eq!(class.members.len(), 2);
        assert!(class.members[0].is_static);
    }

    #[test]
    fn template_literals_split_text_and_expressions() {
        let expr = single_expr("`Hello, ${name}!`");
        let Expr::Template(parts) = expr else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], TemplatePart::Text("Hello, ".into()));
    }

    #[test]
    fn string_escapes_are_resolved() {
        assert_eq!(single_expr(r#""a\nA\x42""#), Expr::Str("a\nAB".into()));
    }

    #[test]
    fn statements_on_one_line_need_a_semicolon() {
        let err = parse_program("let a = 1 2").unwrap_err();
        assert_eq!(err.message, "Unexpected token at line 1, column 11");
        assert!(parse_program("console.log(1) console.log(2)").is_err());
        assert!(parse_program("x = 1 /* note */ y = 2").is_err());
        assert!(parse_program("f(1 // first\n) g()").is_err());

        assert_eq!(parse_program("x = 1 /* note\n */ y = 2").unwrap().len(), 2);
        assert_eq!(parse_program("if (a) { b() } c()").unwrap().len(), 2);
        assert_eq!(parse_program("const f = () => { return 1 }\nf()").unwrap().len(), 2);
    }

    #[test]
    fn line_break_after_return_ends_the_statement() {
        let program = parse_program("function f() {\n  return\n  { a: 1 };\n}").unwrap();
        let Stmt::Function(def) = &program[0] else {
            panic!("expected function");
        };
        let FunctionBody::Block(body) = &def.body else {
            panic!("expected block body");
        };
        assert_eq!(body[0], Stmt::Return(None));
        assert_eq!(body[1], Stmt::Block(vec![Stmt::Expr(Expr::Number(1.0))]));
    }

    #[test]
    fn throw_needs_its_operand_on_the_same_line() {
        assert!(parse_program("throw\nnew Error('x')").is_err());
        assert!(parse_program("throw /* why */ new Error('x')").is_ok());
    }

    #[test]
    fn increment_after_a_line_break_is_prefix() {
        let program = parse_program("a\n++b").unwrap();
        assert_eq!(program[0], Stmt::Expr(Expr::Ident("a".into())));
        assert!(matches!(
            &program[1],
            Stmt::Expr(Expr::Update { prefix: true, .. })
        ));
        assert!(matches!(
            single_expr("a ++"),
            Expr::Update { prefix: false, .. }
        ));
    }

    #[test]
    fn accessors_in_classes_and_object_literals() {
        let program = parse_program(
            "class P {\n  get x() { return 1; }\n  set x(v) {}\n  static get id() { return 0; }\n  get() {}\n}",
        )
        .unwrap();
        let Stmt::Class(class) = &program[0] else {
            panic!("expected class");
        };
        let kinds: Vec<_> = class
            .members
            .iter()
            .map(|m| match &m.kind {
                MemberKind::Accessor(kind, _) => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(AccessorKind::Get),
                Some(AccessorKind::Set),
                Some(AccessorKind::Get),
                None
            ]
        );
        assert!(class.members[2].is_static);
        assert_eq!(class.members[3].name, "get");

        let Expr::Object(props) = single_expr("({ get y() { return 2; }, get: 3 })") else {
            panic!("expected object literal");
        };
        assert!(matches!(&props[0], ObjectProp::Accessor(_, AccessorKind::Get, _)));
        assert!(matches!(&props[1], ObjectProp::KeyValue(PropKey::Named(k), _) if k == "get"));
    }

    #[test]
    fn accessor_arity_is_checked() {
        let err = parse_program("class P { get x(a) { return a; } }").unwrap_err();
        assert_eq!(err.message, "Getter must not have any formal parameters.");
        assert!(parse_program("({ set y() {} })").is_err());
    }

    #[test]
    fn unbalanced_input_is_a_syntax_error() {
        let err = parse_program("function (").unwrap_err();
        assert!(err.message.starts_with("Unexpected token"));
    }
}

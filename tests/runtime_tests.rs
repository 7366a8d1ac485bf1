//! The bundled script runtime, driven through the isolation executor the
//! way the verifier drives it.

use std::sync::Arc;

use snipcheck::config::VerifyConfig;
use snipcheck::executor::{ExecutionResult, IsolationExecutor};
use snipcheck::runtime::script::ScriptRuntime;
use snipcheck::snippet::{build_records, GroupId, RawSnippet};

fn run(code: &str) -> ExecutionResult {
    let executor = IsolationExecutor::new(Arc::new(ScriptRuntime::default()), &VerifyConfig::default());
    let mut handle = executor.fresh_context(GroupId(0)).unwrap();
    let record = build_records(vec![RawSnippet::new(code)]).remove(0);
    executor.execute(&record, &mut handle).unwrap()
}

fn output(code: &str) -> Vec<String> {
    let result = run(code);
    assert_eq!(result.thrown, None, "captured so far: {:?}", result.captured_lines);
    assert!(!result.timed_out);
    result.captured_lines
}

#[test]
fn array_pipelines() {
    let code = r#"
        const xs = [5, 1, 4];
        console.log(xs.map(x => x * 2).filter(x => x > 2));
        console.log(xs.reduce((a, b) => a + b, 0));
        console.log([...xs].sort((a, b) => a - b).join('-'));
        console.log(xs.includes(4), xs.indexOf(9));
    "#;
    assert_eq!(output(code), vec!["[ 10, 8 ]", "10", "1-4-5", "true -1"]);
}

#[test]
fn string_methods() {
    let code = r#"
        console.log('Hello'.padEnd(7, '!'));
        console.log('a,b,c'.split(','));
        console.log(`${1 + 1} items`);
        console.log('  trimmed '.trim().toUpperCase());
        console.log('banana'.replaceAll('a', 'o'));
    "#;
    assert_eq!(
        output(code),
        vec!["Hello!!", "[ 'a', 'b', 'c' ]", "2 items", "TRIMMED", "bonono"]
    );
}

#[test]
fn json_round_trips_through_text() {
    let code = r#"
        console.log(JSON.stringify({ a: 1, b: [true, null], c: undefined }));
        console.log(JSON.parse('{"x": [1, 2]}').x[1]);
    "#;
    assert_eq!(output(code), vec![r#"{"a":1,"b":[true,null]}"#, "2"]);
}

#[test]
fn circular_json_is_a_type_error() {
    let result = run("const loop = {};\nloop.self = loop;\nJSON.stringify(loop);");
    assert_eq!(
        result.thrown.as_deref(),
        Some("TypeError: Converting circular structure to JSON")
    );
}

#[test]
fn try_catch_finally_and_switch() {
    let code = r#"
        try {
          null.x;
        } catch (e) {
          console.log(e.name);
        } finally {
          console.log('done');
        }
        function label(n) {
          switch (n) {
            case 1:
            case 2:
              return 'small';
            default:
              return 'large';
          }
        }
        console.log(label(2), label(7));
    "#;
    assert_eq!(output(code), vec!["TypeError", "done", "small large"]);
}

#[test]
fn numbers_print_like_the_console() {
    let code = "console.log((3.14159).toFixed(2), (255).toString(16), 0.1 + 0.2, 1 / 0, -0);";
    assert_eq!(output(code), vec!["3.14 ff 0.30000000000000004 Infinity -0"]);
}

#[test]
fn classes_and_static_methods() {
    let code = r#"
        class Temp {
          static of(c) { return new Temp(c); }
          constructor(c) { this.c = c; }
        }
        console.log(Temp.of(3));
        const err = new RangeError('too far');
        console.log(err.message, err instanceof Error);
    "#;
    assert_eq!(output(code), vec!["Temp { c: 3 }", "too far true"]);
}

#[test]
fn custom_errors_describe_themselves() {
    let code = r#"
        class ValidationError extends Error {
          constructor(message) {
            super(message);
            this.name = 'ValidationError';
          }
        }
        throw new ValidationError('bad input');
    "#;
    assert_eq!(run(code).thrown.as_deref(), Some("ValidationError: bad input"));
}

#[test]
fn loop_closures_capture_each_iteration() {
    let code = r#"
        const fns = [];
        for (let i = 0; i < 3; i++) {
          fns.push(() => i);
        }
        console.log(fns.map(f => f()));
    "#;
    assert_eq!(output(code), vec!["[ 0, 1, 2 ]"]);
}

#[test]
fn object_helpers() {
    let code = r#"
        const scores = { ada: 3, bob: 5 };
        console.log(Object.keys(scores));
        console.log(Object.entries(scores));
        const merged = Object.assign({}, scores, { cy: 1 });
        console.log(merged);
    "#;
    assert_eq!(
        output(code),
        vec![
            "[ 'ada', 'bob' ]",
            "[ [ 'ada', 3 ], [ 'bob', 5 ] ]",
            "{ ada: 3, bob: 5, cy: 1 }"
        ]
    );
}

#[test]
fn intervals_stop_when_cleared() {
    let code = r#"
        let ticks = 0;
        const id = setInterval(() => {
          ticks++;
          console.log('tick', ticks);
          if (ticks === 3) clearInterval(id);
        }, 100);
    "#;
    assert_eq!(output(code), vec!["tick 1", "tick 2", "tick 3"]);
}

#[test]
fn output_before_a_throw_is_kept() {
    let result = run("console.log('a');\nconsole.log(missing);\nconsole.log('b');");
    assert_eq!(result.captured_lines, vec!["a"]);
    assert_eq!(
        result.thrown.as_deref(),
        Some("ReferenceError: missing is not defined")
    );
}

#[test]
fn accessors_print_and_serialize_like_node() {
    let code = r#"
        const box = {
          value: 2,
          get double() { return this.value * 2; },
          set double(v) { this.value = v / 2; },
        };
        box.double = 10;
        console.log(box.value, box.double);
        console.log(box);
        console.log(JSON.stringify(box), Object.keys(box));
        class Reading {
          static get unit() { return 'C'; }
          get label() { return 'reading'; }
        }
        const r = new Reading();
        r.label = 'changed';
        console.log(Reading.unit, r.label, r);
    "#;
    assert_eq!(
        output(code),
        vec![
            "5 10",
            "{ value: 5, double: [Getter/Setter] }",
            r#"{"value":5,"double":10} [ 'value', 'double' ]"#,
            "C reading Reading {}",
        ]
    );
}

#[test]
fn unsupported_syntax_and_builtins_fail_loudly() {
    let destructuring = run("const { a, ...rest } = { a: 1, b: 2 };");
    assert!(destructuring
        .thrown
        .as_deref()
        .unwrap()
        .starts_with("SyntaxError"));

    let map = run("const m = new Map();");
    assert_eq!(map.thrown.as_deref(), Some("ReferenceError: Map is not defined"));
}

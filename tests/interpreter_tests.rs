use droidscript::script::compiler::CompiledScript;
use droidscript::script::error::ScriptError;
use droidscript::script::interpreter::{Interpreter, run_compiled};

mod common;
use crate::common::fixtures::RecordingHost;

const STEPS: usize = 100_000;

fn run(script: &str, host: &mut RecordingHost) -> Result<Vec<String>, ScriptError> {
    run_compiled(&CompiledScript::compile(script), host, STEPS)
}

fn output(script: &str) -> Vec<String> {
    let mut host = RecordingHost::new();
    match run(script, &mut host) {
        Ok(out) => out,
        Err(e) => panic!("script should run: {}", e),
    }
}

fn failure(script: &str) -> ScriptError {
    let mut host = RecordingHost::new();
    match run(script, &mut host) {
        Ok(out) => panic!("script should fail, printed {:?}", out),
        Err(e) => e,
    }
}

// ============================================================================
// Language basics
// ============================================================================

#[test]
fn print_joins_arguments_with_spaces() {
    assert_eq!(output("print('a', 1, True, None)"), vec!["a 1 True None"]);
    assert_eq!(output("print(1, 2, sep='-')"), vec!["1-2"]);
}

#[test]
fn arithmetic_and_strings() {
    let script = "\
name = 'alice'
print(f'{name.upper()} has {len(name)} letters')
print(7 // 2, 7 % 3, 2 ** 10, 1 / 4)
print(' x '.strip() + ','.join(['a', 'b']))";
    assert_eq!(output(script), vec!["ALICE has 5 letters", "3 1 1024 0.25", "xa,b"]);
}

#[test]
fn loops_functions_and_collections() {
    let script = "\
def total(values, bonus=0):
    result = bonus
    for v in values:
        if v < 0:
            continue
        if v > 100:
            break
        result += v
    return result

counts = {'a': 1}
counts['b'] = 2
squares = [x * x for x in range(4)]
print(total([1, -5, 2, 200, 9]), total(squares, bonus=1))
print(sorted(counts.keys()), counts.get('c', 0))
i = 0
while i < 3:
    i += 1
print(i)";
    assert_eq!(output(script), vec!["3 15", "['a', 'b'] 0", "3"]);
}

#[test]
fn comment_line_ends_a_block() {
    let script = "\
if False:
    print('inside')
# next step
print('after')";
    assert_eq!(output(script), vec!["after"]);
}

#[test]
fn blank_line_ends_a_block() {
    let script = "\
def f():
    return 1

c = 5
for i in range(2):
    c += f()

    # still in the loop
    c += 10
print(c)";
    assert_eq!(output(script), vec!["27"]);
}

// ============================================================================
// Exceptions and limits
// ============================================================================

#[test]
fn runtime_errors_can_be_caught() {
    let script = "\
try:
    x = 1 / 0
except Exception as e:
    print(e)
finally:
    print('done')";
    assert_eq!(output(script), vec!["ZeroDivisionError: division by zero", "done"]);
}

#[test]
fn raise_reads_as_type_and_message() {
    let err = failure("raise ValueError('bad input')");
    assert_eq!(err.kind(), "runtime");
    assert_eq!(err.message(), "ValueError: bad input");
    assert_eq!(err.line(), 2);
}

#[test]
fn engine_errors_are_not_caught_by_scripts() {
    let script = "\
try:
    tap($missing_button)
except:
    print('caught')";
    let err = failure(script);

    assert_eq!(err.kind(), "selector_not_found");
    assert!(err.engine_error().is_some());
    let compiled = CompiledScript::compile(script);
    assert_eq!(compiled.original_line(err.line()), Some(2));
}

#[test]
fn unknown_names_are_name_errors() {
    let err = failure("print(undefined_thing)");
    assert_eq!(err.message(), "NameError: name 'undefined_thing' is not defined");
}

#[test]
fn runaway_loops_hit_the_step_limit() {
    let mut host = RecordingHost::new();
    let result = run_compiled(&CompiledScript::compile("while True:\n    pass"), &mut host, 50);
    match result {
        Err(ScriptError::Runtime { message, .. }) => assert!(message.contains("step limit of 50")),
        other => panic!("expected step limit, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn oversized_repetition_is_a_memory_error() {
    let err = failure("x = 'ab' * 9000000000000000000");
    assert_eq!(err.message(), "MemoryError: repeated sequence too large");

    let err = failure("x = [1, 2] * 9000000000000000000");
    assert_eq!(err.message(), "MemoryError: repeated sequence too large");

    assert_eq!(output("print([] * 9000000000000000000, 'ab' * 2)"), vec!["[] abab"]);
}

#[test]
fn unbounded_recursion_is_stopped() {
    let err = failure("def f(n):\n    return f(n + 1)\nf(0)");
    assert!(err.message().starts_with("RecursionError"));
}

#[test]
fn syntax_errors_report_their_line() {
    let mut host = RecordingHost::new();
    let mut interpreter = Interpreter::new(&mut host, STEPS);
    let err = match interpreter.run_source("x = 1\nif x\n    pass\n") {
        Ok(()) => panic!("missing colon should not parse"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), "syntax");
    assert_eq!(err.line(), 2);
}

// ============================================================================
// Engine calls
// ============================================================================

#[test]
fn engine_calls_reach_the_host_with_line_numbers() {
    let mut host = RecordingHost::new();
    let result = run("tap($send_button)\nset_text($message_input, 'hi')\nback()", &mut host);

    assert!(result.is_ok());
    assert_eq!(
        host.calls,
        vec!["tap $send_button", "set_text $message_input hi", "back"]
    );
    for line in [2, 3, 4, 5, 6] {
        assert!(host.lines.contains(&line), "line {} should be reported", line);
    }
}

#[test]
fn engine_results_flow_back_into_the_script() {
    let mut host = RecordingHost::new().with_text("$title", "Inbox");
    let script = "\
if get_text($title) == 'Inbox':
    print('on inbox')
attrs = get_attributes($title)
print(attrs['text'], attrs['clickable'])
print(scroll($list, 'down'), check_ele_exist($title))";
    let out = match run(script, &mut host) {
        Ok(out) => out,
        Err(e) => panic!("script should run: {}", e),
    };

    assert_eq!(out, vec!["on inbox", "hello True", "True True"]);
    assert!(host.calls.contains(&"scroll $list down".to_string()));
}

#[test]
fn keyword_arguments_are_accepted() {
    let mut host = RecordingHost::new();
    let result = run("verifier.scroll(element_selector=$list, direction='up')", &mut host);
    assert!(result.is_ok());
    assert_eq!(host.calls, vec!["scroll $list up"]);
}

#[test]
fn bad_scroll_direction_is_a_value_error() {
    let err = failure("scroll($list, 'sideways')");
    assert_eq!(err.message(), "ValueError: unknown scroll direction 'sideways'");
}

// ============================================================================
// List handles
// ============================================================================

#[test]
fn handles_support_index_len_and_iteration() {
    let mut host = RecordingHost::new();
    let script = "\
print(len($contacts))
tap($contacts[-1])
for item in $contacts:
    long_tap(item)";
    let out = match run(script, &mut host) {
        Ok(out) => out,
        Err(e) => panic!("script should run: {}", e),
    };

    assert_eq!(out, vec!["3"]);
    assert_eq!(
        host.calls,
        vec![
            "len $contacts",
            "index $contacts -1",
            "tap $contacts//p[@id='12']",
            "iterate $contacts",
            "long_tap $contacts//p[@id='10']",
            "long_tap $contacts//p[@id='11']",
            "long_tap $contacts//p[@id='12']",
        ]
    );
}

#[test]
fn out_of_range_index_is_an_engine_error() {
    let err = failure("tap($contacts[5])");
    assert_eq!(err.kind(), "invalid_index");
}

#[test]
fn handle_methods_scope_actions_to_the_list() {
    let mut host = RecordingHost::new();
    let script = "\
$contacts.tap($call_button)
found = $contacts.match('Alice')
print(len(found))
$contacts.scroll('up')";
    let out = match run(script, &mut host) {
        Ok(out) => out,
        Err(e) => panic!("script should run: {}", e),
    };

    assert_eq!(out, vec!["1"]);
    assert_eq!(host.calls[0], "tap $contacts > $call_button");
    assert!(host.calls[1].starts_with("match $contacts Text(\"Alice\")"));
    assert_eq!(host.calls[2], "scroll $contacts up");
}

#[test]
fn unknown_handle_method_is_an_attribute_error() {
    let err = failure("$contacts.swipe()");
    assert_eq!(err.message(), "AttributeError: 'element_list' object has no attribute 'swipe'");
}

use droidscript::script::compiler::{CompiledScript, sanitize_name};

fn lines(compiled: &CompiledScript) -> Vec<&str> {
    compiled.executable.lines().collect()
}

// ============================================================================
// Declarations and engine calls
// ============================================================================

#[test]
fn single_call_gets_a_declaration_and_an_engine_receiver() {
    let compiled = CompiledScript::compile("tap($send_button)");

    assert_eq!(
        lines(&compiled),
        vec![
            "def __solution__():",
            "    send_button = element_list('send_button')",
            "    verifier.tap(send_button)",
            "__solution__()",
        ]
    );
    assert_eq!(compiled.original_line(2), Some(1));
    assert_eq!(compiled.original_line(3), Some(1));
    assert_eq!(compiled.original_line(1), None);
    assert_eq!(compiled.original_line(4), None);
}

#[test]
fn script_without_symbols_keeps_its_lines() {
    let script = "\
x = 1
if x > 0:
    print(x)";
    let compiled = CompiledScript::compile(script);

    let body: Vec<&str> = lines(&compiled)[1..4].iter().map(|l| &l[4..]).collect();
    assert_eq!(body, script.lines().collect::<Vec<_>>());
    let map: Vec<(usize, usize)> = compiled.line_map.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(map, vec![(2, 1), (3, 2), (4, 3)]);
    assert!(compiled.symbols.is_empty());
}

#[test]
fn each_symbol_is_declared_once_before_its_first_statement() {
    let script = "\
if check_ele_exist($menu):
    tap($menu)
else:
    back()";
    let compiled = CompiledScript::compile(script);

    assert_eq!(
        lines(&compiled),
        vec![
            "def __solution__():",
            "    menu = element_list('menu')",
            "    if verifier.check_ele_exist(menu):",
            "        verifier.tap(menu)",
            "    else:",
            "        verifier.back()",
            "__solution__()",
        ]
    );
    let map: Vec<(usize, usize)> = compiled.line_map.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(map, vec![(2, 1), (3, 1), (4, 2), (5, 3), (6, 4)]);
    assert_eq!(compiled.symbols.len(), 1);
    assert_eq!(compiled.symbols[0].first_line, 1);
}

#[test]
fn nested_declarations_keep_the_statement_indent() {
    let script = "\
for i in range(2):
    set_text($search_box, 'cat')";
    let compiled = CompiledScript::compile(script);

    assert_eq!(compiled.executable_source(3), Some("        search_box = element_list('search_box')"));
    assert_eq!(compiled.executable_source(4), Some("        verifier.set_text(search_box, 'cat')"));
}

#[test]
fn clause_headers_hoist_declarations_to_the_top() {
    let script = "\
x = 1
if x > 2:
    pass
elif get_text($label) == 'a':
    pass";
    let compiled = CompiledScript::compile(script);

    assert_eq!(compiled.executable_source(2), Some("    label = element_list('label')"));
    assert_eq!(compiled.executable_source(3), Some("    x = 1"));
    assert_eq!(compiled.executable_source(6), Some("    elif verifier.get_text(label) == 'a':"));
    assert_eq!(compiled.original_line(2), Some(4));
    assert_eq!(compiled.original_line(6), Some(4));
}

#[test]
fn multiple_symbols_on_a_line_are_declared_in_order() {
    let compiled = CompiledScript::compile("$contacts.tap($call_button)");

    assert_eq!(compiled.symbol_names().collect::<Vec<_>>(), vec!["contacts", "call_button"]);
    assert_eq!(compiled.executable_source(2), Some("    contacts = element_list('contacts')"));
    assert_eq!(compiled.executable_source(3), Some("    call_button = element_list('call_button')"));
    assert_eq!(compiled.executable_source(4), Some("    contacts.tap(call_button)"));
}

#[test]
fn statements_spanning_lines_are_declared_before_their_first_line() {
    let script = "\
set_text($message_input,
         $subject_input)";
    let compiled = CompiledScript::compile(script);

    assert_eq!(
        lines(&compiled)[1..5].to_vec(),
        vec![
            "    message_input = element_list('message_input')",
            "    subject_input = element_list('subject_input')",
            "    verifier.set_text(message_input,",
            "             subject_input)",
        ]
    );
    assert_eq!(compiled.symbols[1].first_line, 2);
    assert_eq!(compiled.original_line(3), Some(2));
}

// ============================================================================
// Literals, comments and definitions
// ============================================================================

#[test]
fn strings_and_comments_are_left_alone() {
    let compiled = CompiledScript::compile("print(\"tap($x)\")  # tap($y)");

    assert!(compiled.symbols.is_empty());
    assert_eq!(compiled.executable_source(2), Some("    print(\"tap($x)\")  # tap($y)"));
}

#[test]
fn triple_quoted_strings_span_lines_untouched() {
    let script = "\
note = '''
tap($inside)
'''
back()";
    let compiled = CompiledScript::compile(script);

    assert!(compiled.symbols.is_empty());
    assert_eq!(compiled.executable_source(3), Some("    tap($inside)"));
    assert_eq!(compiled.executable_source(5), Some("    verifier.back()"));
}

#[test]
fn methods_and_definitions_named_like_engine_calls_are_kept() {
    let script = "\
def tap(x):
    return x
item.scroll('down')";
    let compiled = CompiledScript::compile(script);

    assert_eq!(compiled.executable_source(2), Some("    def tap(x):"));
    assert_eq!(compiled.executable_source(4), Some("    item.scroll('down')"));
}

#[test]
fn script_without_code_gets_a_pass_body() {
    let compiled = CompiledScript::compile("# nothing to do\n");

    assert!(compiled.executable.contains("\n    pass\n"));
    assert!(compiled.executable.ends_with("__solution__()"));
    assert_eq!(compiled.original_source(1), Some("# nothing to do"));
}

// ============================================================================
// Symbol names
// ============================================================================

#[test]
fn symbol_names_are_sanitised_into_identifiers() {
    assert_eq!(sanitize_name("send_button"), "send_button");
    assert_eq!(sanitize_name("btn%1"), "btn_1");
    assert_eq!(sanitize_name("1st_item"), "_1st_item");

    let compiled = CompiledScript::compile("tap($btn%1)");
    assert_eq!(compiled.symbols[0].name, "btn%1");
    assert_eq!(compiled.symbols[0].handle, "btn_1");
    assert_eq!(compiled.symbol_for_handle("btn_1").map(|s| s.name.as_str()), Some("btn%1"));
    assert_eq!(compiled.executable_source(2), Some("    btn_1 = element_list('btn%1')"));
}

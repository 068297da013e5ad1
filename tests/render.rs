//! End-to-end rendering tests.
//!
//! Each test compiles real template source against a fresh environment
//! and checks the rendered output (or the failure) exactly.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use serde_json::json;

use tessera::runtime::interp::ValueCallback;
use tessera::{
    vars_from_json, Environment, EnvironmentOptions, Error, Extension, MemoryLoader, Value, Vars,
};

fn render(src: &str, vars: serde_json::Value) -> String {
    Environment::new()
        .render_str(src, vars_from_json(vars))
        .expect("render failed")
}

fn render_raw(src: &str, vars: serde_json::Value) -> String {
    Environment::with_options(EnvironmentOptions {
        autoescape: false,
        ..Default::default()
    })
    .render_str(src, vars_from_json(vars))
    .expect("render failed")
}

fn render_err(src: &str, vars: serde_json::Value) -> Error {
    Environment::new()
        .render_str(src, vars_from_json(vars))
        .expect_err("expected a render failure")
}

// =============================================================================
// Output and escaping
// =============================================================================

#[test]
fn autoescape_on_escapes_markup() {
    let out = render("Hello {{ name }}", json!({"name": "<b>x</b>"}));
    assert_eq!(out, "Hello &lt;b&gt;x&lt;/b&gt;");
}

#[test]
fn autoescape_off_passes_markup_through() {
    let out = render_raw("Hello {{ name }}", json!({"name": "<b>x</b>"}));
    assert_eq!(out, "Hello <b>x</b>");
}

#[test]
fn undefined_renders_empty_by_default() {
    assert_eq!(render("[{{ missing }}]", json!({})), "[]");
    assert_eq!(render("[{{ nothing }}]", json!({"nothing": null})), "[]");
}

#[test]
fn throw_on_undefined_fails_the_render() {
    let env = Environment::with_options(EnvironmentOptions {
        throw_on_undefined: true,
        ..Default::default()
    });
    let err = env
        .render_str("{{ missing }}", Vars::new())
        .expect_err("expected failure");
    assert!(err.is_render(), "{}", err);
    assert!(err.span.is_some());
    // Defined values still render.
    let ok = env
        .render_str("{{ x }}", vars_from_json(json!({"x": 1})))
        .unwrap();
    assert_eq!(ok, "1");
}

#[test]
fn safe_values_bypass_escaping() {
    let out = render("{{ v | safe }}", json!({"v": "<x>"}));
    assert_eq!(out, "<x>");
}

#[test]
fn safe_survives_string_filters() {
    let out = render(r#"{{ "<x>" | safe | upper }}"#, json!({}));
    assert_eq!(out, "<X>");
}

// =============================================================================
// Expressions
// =============================================================================

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(render("{{ 1 + 2 * 3 }}", json!({})), "7");
    assert_eq!(render("{{ (1 + 2) * 3 }}", json!({})), "9");
    assert_eq!(render("{{ 7 // 2 }}", json!({})), "3");
    assert_eq!(render("{{ 7 / 2 }}", json!({})), "3.5");
    assert_eq!(render("{{ 2 ** 8 }}", json!({})), "256");
    assert_eq!(render("{{ 7 % 4 }}", json!({})), "3");
    assert_eq!(render("{{ -2 ** 2 }}", json!({})), "4");
}

#[test]
fn concat_coerces_to_string() {
    assert_eq!(render("{{ 1 ~ 2 ~ 'a' }}", json!({})), "12a");
}

#[test]
fn comparison_chains() {
    assert_eq!(render("{{ 1 < 2 }}", json!({})), "true");
    assert_eq!(render("{{ 1 < 2 <= 2 }}", json!({})), "true");
    assert_eq!(render("{{ 1 < 2 < 2 }}", json!({})), "false");
    assert_eq!(render("{{ 'a' != 'b' }}", json!({})), "true");
}

#[test]
fn logical_operators_yield_operands() {
    assert_eq!(render("{{ x or 'fallback' }}", json!({"x": ""})), "fallback");
    assert_eq!(render("{{ x and 'yes' }}", json!({"x": 1})), "yes");
    assert_eq!(render("{{ not x }}", json!({"x": 0})), "true");
}

#[test]
fn inline_if_expression() {
    let t = "{{ 'big' if n > 10 else 'small' }}";
    assert_eq!(render(t, json!({"n": 20})), "big");
    assert_eq!(render(t, json!({"n": 3})), "small");
}

#[test]
fn member_lookup_forms() {
    let data = json!({"user": {"name": "ada", "tags": ["a", "b"]}});
    assert_eq!(render("{{ user.name }}", data.clone()), "ada");
    assert_eq!(render("{{ user['name'] }}", data.clone()), "ada");
    assert_eq!(render("{{ user.tags[1] }}", data.clone()), "b");
    assert_eq!(render("{{ user.tags.length }}", data), "2");
}

#[test]
fn missing_members_resolve_to_nothing() {
    assert_eq!(render("[{{ user.nope }}]", json!({"user": {}})), "[]");
}

#[test]
fn in_operator_across_containers() {
    assert_eq!(render("{{ 2 in items }}", json!({"items": [1, 2]})), "true");
    assert_eq!(render("{{ 'el' in word }}", json!({"word": "hello"})), "true");
    assert_eq!(render("{{ 'k' in obj }}", json!({"obj": {"k": 1}})), "true");
    assert_eq!(render("{{ 3 not in items }}", json!({"items": [1, 2]})), "true");
}

#[test]
fn is_tests() {
    assert_eq!(render("{{ x is defined }}", json!({"x": 1})), "true");
    assert_eq!(render("{{ y is defined }}", json!({})), "false");
    assert_eq!(render("{{ y is undefined }}", json!({})), "true");
    assert_eq!(render("{{ x is none }}", json!({"x": null})), "true");
    assert_eq!(render("{{ 4 is even }}", json!({})), "true");
    assert_eq!(render("{{ 4 is not odd }}", json!({})), "true");
    assert_eq!(render("{{ 9 is divisibleby(3) }}", json!({})), "true");
    assert_eq!(render("{{ 'a' is string }}", json!({})), "true");
}

#[test]
fn dict_and_array_literals() {
    assert_eq!(
        render("{{ {'a': 1, 'b': 2}['b'] }}", json!({})),
        "2"
    );
    assert_eq!(render("{{ [10, 20, 30][1] }}", json!({})), "20");
}

// =============================================================================
// Control flow
// =============================================================================

#[test]
fn if_elif_else() {
    let t = "{% if n > 10 %}big{% elif n > 5 %}mid{% else %}small{% endif %}";
    assert_eq!(render(t, json!({"n": 20})), "big");
    assert_eq!(render(t, json!({"n": 7})), "mid");
    assert_eq!(render(t, json!({"n": 1})), "small");
}

#[test]
fn for_renders_items_in_order() {
    let t = "{% for i in items %}{{ i }}{% else %}empty{% endfor %}";
    assert_eq!(render(t, json!({"items": [1, 2, 3]})), "123");
    assert_eq!(render(t, json!({"items": []})), "empty");
}

#[test]
fn for_over_missing_iterable_takes_else() {
    let t = "{% for i in items %}{{ i }}{% else %}none{% endfor %}";
    assert_eq!(render(t, json!({})), "none");
}

#[test]
fn loop_bindings() {
    let t = "{% for i in items %}{{ loop.index }}:{{ i }}{% if not loop.last %},{% endif %}{% endfor %}";
    assert_eq!(render(t, json!({"items": ["a", "b"]})), "1:a,2:b");
    let t = "{% for i in items %}{{ loop.revindex }}{{ loop.first }}{% endfor %}";
    assert_eq!(render(t, json!({"items": ["x", "y"]})), "2true1false");
}

#[test]
fn for_unpacks_pairs() {
    let t = "{% for a, b in pairs %}{{ a }}={{ b }};{% endfor %}";
    assert_eq!(
        render(t, json!({"pairs": [[1, "x"], [2, "y"]]})),
        "1=x;2=y;"
    );
}

#[test]
fn for_over_object_binds_keys_and_values() {
    let t = "{% for k, v in obj %}{{ k }}={{ v }};{% endfor %}";
    assert_eq!(render(t, json!({"obj": {"a": 1, "b": 2}})), "a=1;b=2;");
    let t = "{% for k in obj %}{{ k }};{% endfor %}";
    assert_eq!(render(t, json!({"obj": {"a": 1, "b": 2}})), "a;b;");
}

#[test]
fn for_over_string_iterates_chars() {
    assert_eq!(
        render("{% for c in word %}{{ c }}.{% endfor %}", json!({"word": "ab"})),
        "a.b."
    );
}

#[test]
fn loops_shadow_and_restore() {
    let t = "{% set x = 'outer' %}{% for x in [1] %}{{ x }}{% endfor %}{{ x }}";
    assert_eq!(render(t, json!({})), "1outer");
}

#[test]
fn switch_matches_cases_and_default() {
    let t = "{% switch x %}{% case 1 %}one{% case 2 %}two{% default %}many{% endswitch %}";
    assert_eq!(render(t, json!({"x": 1})), "one");
    assert_eq!(render(t, json!({"x": 2})), "two");
    assert_eq!(render(t, json!({"x": 9})), "many");
}

#[test]
fn switch_empty_case_falls_through() {
    let t = "{% switch x %}{% case 1 %}{% case 2 %}low{% default %}high{% endswitch %}";
    assert_eq!(render(t, json!({"x": 1})), "low");
    assert_eq!(render(t, json!({"x": 2})), "low");
    assert_eq!(render(t, json!({"x": 3})), "high");
}

// =============================================================================
// Set, capture, whitespace
// =============================================================================

#[test]
fn set_binds_and_renders() {
    assert_eq!(render("{% set x = 2 + 3 %}{{ x }}", json!({})), "5");
}

#[test]
fn set_multiple_targets_share_one_value() {
    assert_eq!(render("{% set a, b = 7 %}{{ a }}/{{ b }}", json!({})), "7/7");
}

#[test]
fn set_capture_collects_body() {
    let t = "{% set greeting %}Hi {{ name }}!{% endset %}[{{ greeting | safe }}]";
    assert_eq!(render(t, json!({"name": "ada"})), "[Hi ada!]");
}

#[test]
fn trim_markers_eat_whitespace() {
    assert_eq!(render("a  \n  {{- 'x' }}", json!({})), "ax");
    assert_eq!(render("{{ 'x' -}}  \n  b", json!({})), "xb");
    assert_eq!(render("a {%- if true %}x{% endif %}", json!({})), "ax");
}

#[test]
fn comments_disappear() {
    assert_eq!(render("a{# not rendered #}b", json!({})), "ab");
}

#[test]
fn raw_blocks_are_verbatim() {
    assert_eq!(
        render("{% raw %}{{ untouched }}{% endraw %}", json!({})),
        "{{ untouched }}"
    );
}

// =============================================================================
// Macros and call
// =============================================================================

#[test]
fn macro_positional_and_keyword_args_agree() {
    let t = "{% macro m(a, b=2) %}{{ a }}-{{ b }}{% endmacro %}{{ m(1) }}/{{ m(1, b=3) }}/{{ m(a=5, b=6) }}";
    assert_eq!(render(t, json!({})), "1-2/1-3/5-6");
}

#[test]
fn macro_output_is_safe() {
    let t = "{% macro tag(x) %}<b>{{ x }}</b>{% endmacro %}{{ tag('hi') }}";
    assert_eq!(render(t, json!({})), "<b>hi</b>");
}

#[test]
fn macro_bodies_are_isolated_from_template_scope() {
    let t = "{% set secret = 'visible' %}{% macro m() %}[{{ secret }}]{% endmacro %}{{ m() }}";
    // The macro frame is isolated, but top-level sets also write the
    // context, which stays reachable.
    assert_eq!(render(t, json!({})), "[visible]");
}

#[test]
fn call_tag_provides_caller() {
    let t = "{% macro wrap() %}<{{ caller() }}>{% endmacro %}{% call wrap() %}body{% endcall %}";
    assert_eq!(render(t, json!({})), "<body>");
}

#[test]
fn caller_sees_enclosing_loop_variables() {
    let t = "{% macro item() %}({{ caller() }}){% endmacro %}{% for i in [1, 2] %}{% call item() %}{{ i }}{% endcall %}{% endfor %}";
    assert_eq!(render(t, json!({})), "(1)(2)");
}

#[test]
fn calling_a_non_function_is_a_render_error() {
    let err = render_err("{{ x() }}", json!({"x": 4}));
    assert!(err.message.contains("unable to call"), "{}", err);
}

// =============================================================================
// Inheritance, include, import
// =============================================================================

fn env_with(templates: &[(&str, &str)]) -> Environment {
    let env = Environment::new();
    let mut loader = MemoryLoader::new();
    for (name, src) in templates {
        loader.add(*name, *src);
    }
    env.add_loader(loader);
    env
}

#[test]
fn extends_replaces_child_output_and_super_appends() {
    let env = env_with(&[("p", "A[{% block b %}P{% endblock %}]B")]);
    let out = env
        .render_str(
            "{% extends \"p\" %}{% block b %}C{{ super() }}{% endblock %}",
            Vars::new(),
        )
        .unwrap();
    assert_eq!(out, "A[CP]B");
}

#[test]
fn child_non_block_output_is_discarded() {
    let env = env_with(&[("p", "1{% block b %}x{% endblock %}2")]);
    let out = env
        .render_str(
            "IGNORED{% extends \"p\" %}{% block b %}y{% endblock %}IGNORED",
            Vars::new(),
        )
        .unwrap();
    assert_eq!(out, "1y2");
}

#[test]
fn extends_may_be_conditional() {
    let env = env_with(&[("p", "P[{% block b %}base{% endblock %}]")]);
    let t = "{% if fancy %}{% extends \"p\" %}{% endif %}{% block b %}mine{% endblock %}";
    assert_eq!(
        env.render_str(t, vars_from_json(json!({"fancy": true}))).unwrap(),
        "P[mine]"
    );
    assert_eq!(
        env.render_str(t, vars_from_json(json!({"fancy": false}))).unwrap(),
        "mine"
    );
}

#[test]
fn three_level_inheritance_resolves_innermost_override() {
    let env = env_with(&[
        ("base", "<{% block b %}base{% endblock %}>"),
        ("mid", "{% extends \"base\" %}{% block b %}mid({{ super() }}){% endblock %}"),
    ]);
    let out = env
        .render_str(
            "{% extends \"mid\" %}{% block b %}leaf({{ super() }}){% endblock %}",
            Vars::new(),
        )
        .unwrap();
    assert_eq!(out, "<leaf(mid(base))>");
}

#[test]
fn blocks_render_in_place_without_extends() {
    let out = render("a{% block b %}x{% endblock %}c", json!({}));
    assert_eq!(out, "axc");
}

#[test]
fn include_renders_with_current_variables() {
    let env = env_with(&[("part", "Hello {{ name }}")]);
    let out = env
        .render_str("[{% include \"part\" %}]", vars_from_json(json!({"name": "ada"})))
        .unwrap();
    assert_eq!(out, "[Hello ada]");
}

#[test]
fn include_inside_loop_sees_loop_variables() {
    let env = env_with(&[("part", "{{ i }};")]);
    let out = env
        .render_str(
            "{% for i in [1, 2] %}{% include \"part\" %}{% endfor %}",
            Vars::new(),
        )
        .unwrap();
    assert_eq!(out, "1;2;");
}

#[test]
fn include_missing_fails_unless_ignored() {
    let env = env_with(&[]);
    let err = env
        .render_str("{% include \"gone\" %}", Vars::new())
        .unwrap_err();
    assert!(err.message.contains("gone"), "{}", err);
    let out = env
        .render_str("a{% include \"gone\" ignore missing %}b", Vars::new())
        .unwrap();
    assert_eq!(out, "ab");
}

#[test]
fn import_binds_module_macros() {
    let env = env_with(&[(
        "forms",
        "{% macro field(name) %}<input name=\"{{ name }}\">{% endmacro %}",
    )]);
    let out = env
        .render_str(
            "{% import \"forms\" as forms %}{{ forms.field('user') }}",
            Vars::new(),
        )
        .unwrap();
    assert_eq!(out, "<input name=\"user\">");
}

#[test]
fn from_import_with_alias() {
    let env = env_with(&[(
        "forms",
        "{% macro field(name) %}[{{ name }}]{% endmacro %}{% set title = 'Forms' %}",
    )]);
    let out = env
        .render_str(
            "{% from \"forms\" import field as f, title %}{{ f('x') }}{{ title }}",
            Vars::new(),
        )
        .unwrap();
    assert_eq!(out, "[x]Forms");
}

#[test]
fn from_import_missing_name_fails_with_clear_message() {
    let env = env_with(&[("m", "{% set a = 1 %}")]);
    let err = env
        .render_str("{% from \"m\" import nope %}", Vars::new())
        .unwrap_err();
    assert!(err.message.contains("cannot import 'nope'"), "{}", err);
}

#[test]
fn import_without_context_does_not_see_caller_vars() {
    let env = env_with(&[("m", "{% set echoed = outer | default('unset') %}")]);
    let out = env
        .render_str(
            "{% from \"m\" import echoed %}{{ echoed }}",
            vars_from_json(json!({"outer": "here"})),
        )
        .unwrap();
    assert_eq!(out, "unset");
    let out = env
        .render_str(
            "{% from \"m\" import echoed with context %}{{ echoed }}",
            vars_from_json(json!({"outer": "here"})),
        )
        .unwrap();
    assert_eq!(out, "here");
}

// =============================================================================
// Filters, globals
// =============================================================================

#[test]
fn filter_chains_are_left_associative() {
    assert_eq!(render("{{ name | trim | upper }}", json!({"name": "  ada "})), "ADA");
}

#[test]
fn filter_with_arguments() {
    assert_eq!(render("{{ xs | join(', ') }}", json!({"xs": [1, 2]})), "1, 2");
    assert_eq!(render("{{ missing | default('dash') }}", json!({})), "dash");
    assert_eq!(render("{{ n | round(1) }}", json!({"n": 2.54})), "2.5");
}

#[test]
fn unknown_filter_is_a_render_error() {
    let err = render_err("{{ x | frobnicate }}", json!({"x": 1}));
    assert!(err.message.contains("filter not found"), "{}", err);
}

#[test]
fn user_registered_filters_apply() {
    let env = Environment::new();
    env.add_filter("shout", |args| {
        Ok(Value::str(format!("{}!!", args[0].to_display())))
    });
    let out = env
        .render_str("{{ word | shout }}", vars_from_json(json!({"word": "go"})))
        .unwrap();
    assert_eq!(out, "go!!");
}

#[test]
fn range_global() {
    assert_eq!(
        render("{% for i in range(3) %}{{ i }}{% endfor %}", json!({})),
        "012"
    );
    assert_eq!(
        render("{% for i in range(1, 7, 2) %}{{ i }}{% endfor %}", json!({})),
        "135"
    );
}

#[test]
fn cycler_and_joiner_globals() {
    let t = "{% set row = cycler('odd', 'even') %}{% for i in [1, 2, 3] %}{{ row.next() }};{% endfor %}";
    assert_eq!(render(t, json!({})), "odd;even;odd;");
    let t = "{% set sep = joiner('|') %}{% for i in [1, 2, 3] %}{{ sep() }}{{ i }}{% endfor %}";
    assert_eq!(render(t, json!({})), "1|2|3");
}

// =============================================================================
// Async filters and async iteration
// =============================================================================

type Deferred = Rc<RefCell<Vec<(Value, ValueCallback)>>>;

/// Registers `slow`, a filter that parks its callbacks on a queue the
/// test drains by hand.
fn env_with_deferred_filter() -> (Environment, Deferred) {
    let env = Environment::new();
    let queue: Deferred = Rc::new(RefCell::new(Vec::new()));
    let q = Rc::clone(&queue);
    env.add_async_filter("slow", move |args, cb| {
        let value = args.into_iter().next().unwrap_or(Value::Undefined);
        q.borrow_mut().push((value, cb));
    });
    (env, queue)
}

fn capture_result() -> (Rc<RefCell<Option<tessera::Result<String>>>>, Box<dyn FnOnce(tessera::Result<String>)>) {
    let slot = Rc::new(RefCell::new(None));
    let writer = Rc::clone(&slot);
    (
        slot,
        Box::new(move |r| {
            *writer.borrow_mut() = Some(r);
        }),
    )
}

#[test]
fn async_filter_suspends_and_resumes() {
    let (env, queue) = env_with_deferred_filter();
    let template = env.compile_str("[{{ x | slow }}]", None).unwrap();
    let (slot, cb) = capture_result();
    template.render_with(vars_from_json(json!({"x": "v"})), cb);
    // Still parked on the filter.
    assert!(slot.borrow().is_none());
    let (value, cb) = queue.borrow_mut().pop().unwrap();
    cb(Ok(Value::str(format!("{}+", value.to_display()))));
    let out = slot.borrow_mut().take().unwrap().unwrap();
    assert_eq!(out, "[v+]");
}

#[test]
fn async_all_reassembles_output_in_input_order() {
    let (env, queue) = env_with_deferred_filter();
    let template = env
        .compile_str("{% asyncAll i in items %}{{ i | slow }}{% endall %}", None)
        .unwrap();
    let (slot, cb) = capture_result();
    template.render_with(vars_from_json(json!({"items": ["a", "b", "c"]})), cb);
    // All three iterations suspended concurrently.
    assert_eq!(queue.borrow().len(), 3);
    // Complete them in reverse order.
    loop {
        let next = queue.borrow_mut().pop();
        let Some((value, cb)) = next else { break };
        cb(Ok(value));
    }
    let out = slot.borrow_mut().take().unwrap().unwrap();
    assert_eq!(out, "abc");
}

#[test]
fn async_each_runs_iterations_in_sequence() {
    let (env, queue) = env_with_deferred_filter();
    let template = env
        .compile_str("{% asyncEach i in items %}{{ i | slow }}{% endeach %}", None)
        .unwrap();
    let (slot, cb) = capture_result();
    template.render_with(vars_from_json(json!({"items": ["a", "b", "c"]})), cb);
    let mut completions = Vec::new();
    // Only one iteration is in flight at a time; finishing one starts
    // the next.
    loop {
        let next = queue.borrow_mut().pop();
        let Some((value, cb)) = next else { break };
        assert!(queue.borrow().is_empty());
        completions.push(value.to_display());
        cb(Ok(value));
    }
    assert_eq!(completions, vec!["a", "b", "c"]);
    let out = slot.borrow_mut().take().unwrap().unwrap();
    assert_eq!(out, "abc");
}

#[test]
fn async_filter_error_short_circuits_once() {
    let (env, queue) = env_with_deferred_filter();
    let template = env
        .compile_str("{% asyncAll i in items %}{{ i | slow }}{% endall %}", None)
        .unwrap();
    let (slot, cb) = capture_result();
    template.render_with(vars_from_json(json!({"items": [1, 2]})), cb);
    let (_, first) = queue.borrow_mut().pop().unwrap();
    first(Err(tessera::Error::render("boom")));
    let result = slot.borrow_mut().take().unwrap();
    assert!(result.is_err());
    // The late completion is discarded without re-invoking the callback.
    let (value, second) = queue.borrow_mut().pop().unwrap();
    second(Ok(value));
    assert!(slot.borrow().is_none());
}

#[test]
fn sync_render_of_deferred_template_reports_clearly() {
    let (env, _queue) = env_with_deferred_filter();
    let err = env
        .render_str("{{ x | slow }}", vars_from_json(json!({"x": 1})))
        .unwrap_err();
    assert!(err.message.contains("render_with"), "{}", err);
}

// =============================================================================
// Extensions
// =============================================================================

struct Shout;

impl Extension for Shout {
    fn name(&self) -> &str {
        "Shout"
    }
    fn tags(&self) -> Vec<String> {
        vec!["shout".to_string()]
    }
    fn run(&self, args: &[Value], content: Option<&str>) -> tessera::Result<Value> {
        let excl = args
            .first()
            .map(|v| v.to_display())
            .unwrap_or_else(|| "!".to_string());
        Ok(Value::str(format!(
            "{}{}",
            content.unwrap_or("").to_uppercase(),
            excl
        )))
    }
}

#[test]
fn custom_tag_runs_extension_with_content() {
    let env = Environment::new();
    env.add_extension(Shout);
    let out = env
        .render_str("{% shout '!!' %}hey {{ name }}{% endshout %}", vars_from_json(json!({"name": "you"})))
        .unwrap();
    assert_eq!(out, "HEY YOU!!");
}

struct DeferredStamp {
    queue: Deferred,
}

impl Extension for DeferredStamp {
    fn name(&self) -> &str {
        "DeferredStamp"
    }
    fn tags(&self) -> Vec<String> {
        vec!["stamp".to_string()]
    }
    fn is_async(&self) -> bool {
        true
    }
    fn run(&self, _args: &[Value], _content: Option<&str>) -> tessera::Result<Value> {
        Err(tessera::Error::render("async extension called synchronously"))
    }
    fn run_async(&self, _args: Vec<Value>, content: Option<String>, cb: ValueCallback) {
        self.queue
            .borrow_mut()
            .push((Value::str(content.unwrap_or_default()), cb));
    }
}

#[test]
fn async_extension_suspends_until_completed() {
    let env = Environment::new();
    let queue: Deferred = Rc::new(RefCell::new(Vec::new()));
    env.add_extension(DeferredStamp {
        queue: Rc::clone(&queue),
    });
    let template = env
        .compile_str("<{% stamp %}x{% endstamp %}>", None)
        .unwrap();
    let (slot, cb) = capture_result();
    template.render_with(Vars::new(), cb);
    assert!(slot.borrow().is_none());
    let (value, cb) = queue.borrow_mut().pop().unwrap();
    cb(Ok(Value::str(format!("[{}]", value.to_display()))));
    assert_eq!(slot.borrow_mut().take().unwrap().unwrap(), "<[x]>");
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn filter_errors_carry_template_coordinates() {
    let err = render_err("line1\n{{ n | abs }}", json!({"n": "not a number"}));
    let span = err.span.expect("span");
    assert_eq!(span.line, 2);
}

#[test]
fn errors_name_the_template_they_came_from() {
    let env = env_with(&[("inner", "{{ x | abs }}")]);
    let err = env
        .render_str("{% include \"inner\" %}", vars_from_json(json!({"x": "bad"})))
        .unwrap_err();
    assert_eq!(err.template_name.as_deref(), Some("inner"));
}

#[test]
fn deterministic_output_across_repeated_renders() {
    let env = Environment::new();
    let t = env
        .compile_str("{% for i in range(3) %}{{ i * 2 }}{% endfor %}", None)
        .unwrap();
    let first = t.render(Vars::new()).unwrap();
    let second = t.render(Vars::new()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, "024");
}

//! Control-flow lowering: choices, error handling, map/parallel fan-out,
//! waits, and terminal states.

use serde_json::json;
use stepc::{
    ChoiceRule, CompareOp, CompareValue, DiagnosticKind, Severity, StateKind, SubMachine,
    Transition, compile_project,
};

fn main_machine(source: &str) -> SubMachine {
    let output = compile_project(source);
    let errors: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    output.project.state_machines["main"].machine.clone()
}

fn first_error(source: &str) -> stepc::Diagnostic {
    compile_project(source)
        .diagnostics
        .into_iter()
        .find(|d| d.severity == Severity::Error)
        .expect("expected an error diagnostic")
}

const TASK: &str = "class Foo(Task):\n    async def run(event, context):\n        return event\n";

#[test]
fn if_else_lowers_to_a_choice_with_terminal_branches() {
    let source = "def main(data):\n    if data[\"n\"] > 0:\n        return\n    else:\n        raise Bad(\"x\")\n";
    let machine = main_machine(source);
    assert_eq!(machine.start_key, "Choice-1");
    let StateKind::Choice(choice) = &machine.states["Choice-1"].kind else {
        panic!("expected choice");
    };
    assert_eq!(choice.branches.len(), 1);
    assert_eq!(
        choice.branches[0].rule,
        ChoiceRule::Compare {
            variable: "$['n']".into(),
            op: CompareOp::NumericGreaterThan,
            value: CompareValue::Int(0),
        }
    );
    assert_eq!(choice.branches[0].next, "Succeed-1");
    assert_eq!(choice.default, "Fail-1");
    assert!(matches!(machine.states["Succeed-1"].kind, StateKind::Succeed));
    let StateKind::Fail(fail) = &machine.states["Fail-1"].kind else {
        panic!("expected fail");
    };
    assert_eq!(fail.error, "Bad");
    assert_eq!(fail.cause.as_deref(), Some("x"));
    // The choice state itself carries no transition.
    assert!(machine.states["Choice-1"].transition.is_none());
}

#[test]
fn if_without_else_defaults_to_the_continuation() {
    let source =
        "def main(data):\n    if data[\"a\"] > 0:\n        wait(seconds=1)\n    data[\"x\"] = 1\n";
    let machine = main_machine(source);
    let StateKind::Choice(choice) = &machine.states["Choice-1"].kind else {
        panic!("expected choice");
    };
    assert_eq!(choice.default, "Pass-1");
    // The branch body falls through to the same continuation.
    assert_eq!(machine.states["Wait-1"].next_key(), Some("Pass-1"));
    assert_eq!(machine.states["Pass-1"].transition, Some(Transition::End));
}

#[test]
fn trailing_if_without_else_synthesizes_a_terminal_default() {
    let source = "def main(data):\n    if data[\"a\"] > 0:\n        return\n";
    let machine = main_machine(source);
    let StateKind::Choice(choice) = &machine.states["Choice-1"].kind else {
        panic!("expected choice");
    };
    let default = &machine.states[&choice.default];
    assert!(matches!(default.kind, StateKind::Pass(_)));
    assert_eq!(default.transition, Some(Transition::End));
}

#[test]
fn elif_chain_keeps_branch_order() {
    let source = "def main(data):\n    if data[\"n\"] > 0:\n        data[\"sign\"] = \"pos\"\n    elif data[\"n\"] < 0:\n        data[\"sign\"] = \"neg\"\n    else:\n        data[\"sign\"] = \"zero\"\n";
    let machine = main_machine(source);
    let StateKind::Choice(choice) = &machine.states["Choice-1"].kind else {
        panic!("expected choice");
    };
    assert_eq!(choice.branches.len(), 2);
    let ops: Vec<_> = choice
        .branches
        .iter()
        .map(|branch| match &branch.rule {
            ChoiceRule::Compare { op, .. } => *op,
            other => panic!("unexpected rule {other:?}"),
        })
        .collect();
    assert_eq!(
        ops,
        vec![CompareOp::NumericGreaterThan, CompareOp::NumericLessThan]
    );
}

#[test]
fn duplicate_predicates_are_kept_in_source_order() {
    let source = "def main(data):\n    if data[\"n\"] > 0:\n        data[\"r\"] = \"first\"\n    elif data[\"n\"] > 0:\n        data[\"r\"] = \"second\"\n    else:\n        return\n";
    let machine = main_machine(source);
    let StateKind::Choice(choice) = &machine.states["Choice-1"].kind else {
        panic!("expected choice");
    };
    assert_eq!(choice.branches.len(), 2);
    assert_eq!(choice.branches[0].rule, choice.branches[1].rule);
    let first = &machine.states[&choice.branches[0].next];
    let StateKind::Pass(pass) = &first.kind else {
        panic!("expected pass");
    };
    assert_eq!(pass.result, Some(json!("first")));
}

#[test]
fn empty_choice_branch_is_rejected() {
    let source = "def main(data):\n    if data[\"a\"] > 0:\n        pass\n    else:\n        return\n";
    let diagnostic = first_error(source);
    assert_eq!(diagnostic.kind, DiagnosticKind::Shape);
    assert!(diagnostic.message.contains("choice branch"));
}

#[test]
fn empty_body_produces_a_single_succeed() {
    let machine = main_machine("def main(data):\n    pass\n");
    assert_eq!(machine.start_key, "Succeed-1");
    assert_eq!(machine.states.len(), 1);
    assert!(matches!(machine.states["Succeed-1"].kind, StateKind::Succeed));
}

#[test]
fn docstring_only_body_produces_a_single_succeed() {
    let machine = main_machine("def main(data):\n    \"\"\"Workflow entry point.\"\"\"\n");
    assert_eq!(machine.start_key, "Succeed-1");
}

#[test]
fn multi_statement_try_attaches_catch_to_the_first_state() {
    let source = format!(
        "{TASK}\nclass Bar(Task):\n    async def run(event, context):\n        return\n\nclass Cleanup(Task):\n    async def run(event, context):\n        return\n\ndef main(data):\n    try:\n        Foo()\n        Bar()\n    except:\n        Cleanup()\n"
    );
    let machine = main_machine(&source);
    let StateKind::Task(foo) = &machine.states["Task-1"].kind else {
        panic!("expected task");
    };
    assert_eq!(foo.catch.len(), 1);
    // The second statement keeps running after the guarded one.
    assert_eq!(machine.states["Task-1"].next_key(), Some("Task-2"));
    let StateKind::Task(bar) = &machine.states["Task-2"].kind else {
        panic!("expected task");
    };
    assert!(bar.catch.is_empty());
    assert_eq!(machine.states["Task-2"].transition, Some(Transition::End));
}

#[test]
fn retry_around_more_than_one_statement_is_a_shape_error() {
    let source = format!(
        "{TASK}\ndef main(data):\n    with retry(max_attempts=2):\n        Foo()\n        Foo()\n"
    );
    let diagnostic = first_error(&source);
    assert_eq!(diagnostic.kind, DiagnosticKind::Shape);
    assert!(diagnostic.message.contains("single task"));
}

#[test]
fn catch_on_a_non_task_state_is_a_shape_error() {
    let source = "def main(data):\n    try:\n        data[\"x\"] = 1\n    except:\n        return\n";
    let diagnostic = first_error(source);
    assert_eq!(diagnostic.kind, DiagnosticKind::Shape);
    assert!(diagnostic.message.contains("task states"));
}

#[test]
fn literal_assignments_lower_to_pass_states() {
    let source = "def main(data):\n    data[\"string\"] = \"world\"\n    data[\"number\"] = 123\n    data[\"object\"] = {\"hello\": \"world\"}\n    data[\"array\"] = [{\"hello\": \"world\"}]\n";
    let machine = main_machine(source);
    assert_eq!(machine.states.len(), 4);
    let expected = [
        ("Pass-1", "$['string']", json!("world")),
        ("Pass-2", "$['number']", json!(123)),
        ("Pass-3", "$['object']", json!({"hello": "world"})),
        ("Pass-4", "$['array']", json!([{"hello": "world"}])),
    ];
    for (key, path, value) in expected {
        let StateKind::Pass(pass) = &machine.states[key].kind else {
            panic!("expected pass at {key}");
        };
        assert_eq!(pass.result_path.as_deref(), Some(path));
        assert_eq!(pass.result, Some(value));
    }
    assert_eq!(machine.states["Pass-1"].next_key(), Some("Pass-2"));
    assert_eq!(machine.states["Pass-4"].transition, Some(Transition::End));
}

#[test]
fn data_update_replaces_the_whole_document() {
    let source = "def main(data):\n    data.update({\"hello\": \"world\"})\n";
    let machine = main_machine(source);
    let StateKind::Pass(pass) = &machine.states["Pass-1"].kind else {
        panic!("expected pass");
    };
    assert_eq!(pass.result_path.as_deref(), Some("$"));
    assert_eq!(pass.result, Some(json!({"hello": "world"})));
}

#[test]
fn non_literal_assignment_is_unsupported() {
    let source = "def main(data):\n    data[\"x\"] = range(10)\n";
    let diagnostic = first_error(source);
    assert_eq!(diagnostic.kind, DiagnosticKind::SyntaxUnsupported);
}

#[test]
fn wait_forms_lower_to_the_four_variants() {
    let source = "def main(data):\n    wait(seconds=123)\n    wait(seconds=data[\"delay\"])\n    wait(timestamp=\"2020-03-14T01:59:00Z\")\n    wait(timestamp=data[\"ts\"])\n";
    let machine = main_machine(source);
    use stepc::WaitState::*;
    let kinds: Vec<_> = machine
        .states
        .values()
        .map(|state| match &state.kind {
            StateKind::Wait(wait) => wait.clone(),
            other => panic!("unexpected state {other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            Seconds(123),
            SecondsPath("$['delay']".into()),
            Timestamp("2020-03-14T01:59:00Z".into()),
            TimestampPath("$['ts']".into()),
        ]
    );
}

#[test]
fn wait_requires_exactly_one_duration() {
    let diagnostic = first_error("def main(data):\n    wait()\n");
    assert_eq!(diagnostic.kind, DiagnosticKind::Shape);
    let diagnostic =
        first_error("def main(data):\n    wait(seconds=1, timestamp=\"2020-01-01T00:00:00Z\")\n");
    assert_eq!(diagnostic.kind, DiagnosticKind::Shape);
}

#[test]
fn raise_without_arguments_has_no_cause() {
    let machine = main_machine("def main(data):\n    raise CustomError\n");
    let StateKind::Fail(fail) = &machine.states["Fail-1"].kind else {
        panic!("expected fail");
    };
    assert_eq!(fail.error, "CustomError");
    assert!(fail.cause.is_none());
    assert!(machine.states["Fail-1"].transition.is_none());
}

#[test]
fn stop_execution_lowers_to_fail() {
    let source = "def main(data):\n    context.stop_execution(error=\"Expired\", cause=\"too old\")\n";
    let machine = main_machine(source);
    let StateKind::Fail(fail) = &machine.states["Fail-1"].kind else {
        panic!("expected fail");
    };
    assert_eq!(fail.error, "Expired");
    assert_eq!(fail.cause.as_deref(), Some("too old"));
}

#[test]
fn map_embeds_an_iterator_sub_machine() {
    let source = "class Baz(Task):\n    async def run(event, context):\n        return\n\ndef iterate(data):\n    Baz()\n\ndef main(data):\n    map(data[\"items\"], iterate)\n";
    let machine = main_machine(source);
    let StateKind::Map(map) = &machine.states["Map-1"].kind else {
        panic!("expected map");
    };
    assert_eq!(map.items_path, "$['items']");
    assert!(map.max_concurrency.is_none());
    assert_eq!(map.iterator.start_key, "Task-1");
    let StateKind::Task(task) = &map.iterator.states["Task-1"].kind else {
        panic!("expected iterator task");
    };
    assert_eq!(task.task_name, "Baz");
    // End inside the iterator means end of the iterator, not the outer machine.
    assert_eq!(
        map.iterator.states["Task-1"].transition,
        Some(Transition::End)
    );
    assert_eq!(machine.states["Map-1"].transition, Some(Transition::End));
}

#[test]
fn map_assignment_and_options() {
    let source = "class Baz(Task):\n    async def run(event, context):\n        return\n\ndef iterate(data):\n    Baz()\n\ndef main(data):\n    data[\"out\"] = map(data[\"items\"], iterate, max_concurrency=4)\n";
    let machine = main_machine(source);
    let StateKind::Map(map) = &machine.states["Map-1"].kind else {
        panic!("expected map");
    };
    assert_eq!(map.result_path.as_deref(), Some("$['out']"));
    assert_eq!(map.max_concurrency, Some(4));
}

#[test]
fn map_iterator_must_be_a_defined_function() {
    let source = "def main(data):\n    map(data[\"items\"], missing)\n";
    let diagnostic = first_error(source);
    assert_eq!(diagnostic.kind, DiagnosticKind::Reference);
    assert!(diagnostic.message.contains("missing"));
}

#[test]
fn worker_tasks_inside_a_map_iterator_key_by_item_index() {
    let source = "class Work(Task):\n    service = \"ecs:worker\"\n    spec = \"jobs.mod:Worker\"\n\ndef iterate(data):\n    Work()\n\ndef main(data):\n    map(data[\"items\"], iterate)\n";
    let machine = main_machine(source);
    let StateKind::Map(map) = &machine.states["Map-1"].kind else {
        panic!("expected map");
    };
    let StateKind::Task(task) = &map.iterator.states["Task-1"].kind else {
        panic!("expected task");
    };
    assert!(
        task.parameters["MessageGroupId.$"]
            .as_str()
            .unwrap()
            .contains("$.context_index")
    );
}

#[test]
fn parallel_compiles_each_branch_in_isolation() {
    let source = "class A(Task):\n    async def run(event, context):\n        return\n\nclass B(Task):\n    async def run(event, context):\n        return\n\ndef branch1(data):\n    A()\n\ndef branch2(data):\n    B()\n\ndef main(data):\n    parallel(branch1, branch2)\n";
    let machine = main_machine(source);
    let StateKind::Parallel(parallel) = &machine.states["Parallel-1"].kind else {
        panic!("expected parallel");
    };
    assert_eq!(parallel.branches.len(), 2);
    // Branch key namespaces are isolated: both start at Task-1.
    assert_eq!(parallel.branches[0].start_key, "Task-1");
    assert_eq!(parallel.branches[1].start_key, "Task-1");
}

#[test]
fn parallel_with_a_task_argument_is_a_reference_error() {
    let source = format!("{TASK}\ndef branch1(data):\n    Foo()\n\ndef main(data):\n    parallel(branch1, Foo)\n");
    let diagnostic = first_error(&source);
    assert_eq!(diagnostic.kind, DiagnosticKind::Reference);
}

#[test]
fn self_recursive_iterator_is_rejected() {
    let source = "def main(data):\n    map(data[\"items\"], main)\n";
    let diagnostic = first_error(source);
    assert_eq!(diagnostic.kind, DiagnosticKind::Shape);
    assert!(diagnostic.message.contains("own iterator"));
}

#[test]
fn explicit_key_collision_is_reported() {
    let source = format!(
        "{TASK}\ndef main(data):\n    Foo(key=\"step\")\n    Foo(key=\"step\")\n"
    );
    let diagnostic = first_error(&source);
    assert_eq!(diagnostic.kind, DiagnosticKind::KeyCollision);
    assert!(diagnostic.message.contains("step"));
}

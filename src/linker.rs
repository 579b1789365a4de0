//! Links fragment trees into well-formed sub-machines.
//!
//! Visitation leaves every fragment list in its implicit linear order; the
//! linker walks that order and turns adjacency into `Next` edges, ends the
//! last non-terminal state, flattens choice arms and catch handlers into the
//! enclosing `states` table, and enforces key uniqueness. Map iterators and
//! parallel branches arrive already linked inside their states, so nothing
//! here crosses a sub-machine boundary.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::debug;

use crate::ast::Span;
use crate::ir::{Catch, ChoiceBranch, ChoiceState, PassState, State, StateKind, SubMachine, Transition};
use crate::visitor::Fragment;
use crate::{CompileError, Result};

/// Synthesizes `<Kind>-<n>` state keys, one counter per kind.
#[derive(Debug, Default)]
pub(crate) struct KeyGen {
    counters: BTreeMap<&'static str, u32>,
}

impl KeyGen {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Next key for the given state kind, starting at `<Kind>-1`.
    pub(crate) fn fresh(&mut self, kind: &'static str) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        format!("{kind}-{counter}")
    }
}

/// Where control flows after the fragment currently being linked.
#[derive(Debug, Clone)]
enum Continuation {
    /// Continue at the named state.
    Key(String),
    /// End the enclosing sub-machine.
    End,
}

impl Continuation {
    fn transition(&self) -> Transition {
        match self {
            Continuation::Key(key) => Transition::Next(key.clone()),
            Continuation::End => Transition::End,
        }
    }
}

/// Link a visited fragment list into a [`SubMachine`].
///
/// An empty list links to a single synthesized Succeed state.
pub(crate) fn link(fragments: Vec<Fragment>, keys: &mut KeyGen) -> Result<SubMachine> {
    let mut states = IndexMap::new();
    if fragments.is_empty() {
        let key = keys.fresh("Succeed");
        states.insert(
            key.clone(),
            State {
                key: key.clone(),
                comment: None,
                transition: None,
                kind: StateKind::Succeed,
            },
        );
        return Ok(SubMachine {
            start_key: key,
            states,
        });
    }
    let start_key = link_body(fragments, Continuation::End, &mut states, keys)?;
    debug!(start = %start_key, states = states.len(), "linked sub-machine");
    Ok(SubMachine { start_key, states })
}

/// Link a non-empty fragment list, returning its entry key.
fn link_body(
    fragments: Vec<Fragment>,
    cont: Continuation,
    states: &mut IndexMap<String, State>,
    keys: &mut KeyGen,
) -> Result<String> {
    let entries = fragments
        .iter()
        .map(entry_key)
        .collect::<Result<Vec<_>>>()?;
    let count = fragments.len();
    for (index, fragment) in fragments.into_iter().enumerate() {
        let next = if index + 1 < count {
            Continuation::Key(entries[index + 1].clone())
        } else {
            cont.clone()
        };
        link_fragment(fragment, next, states, keys)?;
    }
    Ok(entries.into_iter().next().expect("non-empty body"))
}

/// The key execution enters a fragment at.
fn entry_key(fragment: &Fragment) -> Result<String> {
    match fragment {
        Fragment::State { state, .. } => Ok(state.key.clone()),
        Fragment::Choice { key, .. } => Ok(key.clone()),
        Fragment::Guarded { body, span, .. } => body.first().map(entry_key).ok_or_else(|| {
            CompileError::shape(
                *span,
                "error handling requires a task statement in the try body",
            )
        })?,
    }
}

fn link_fragment(
    fragment: Fragment,
    cont: Continuation,
    states: &mut IndexMap<String, State>,
    keys: &mut KeyGen,
) -> Result<()> {
    match fragment {
        Fragment::State { mut state, span } => {
            state.transition = if state.is_terminal() {
                None
            } else {
                Some(cont.transition())
            };
            insert_state(states, state, span)
        }
        Fragment::Choice {
            key,
            arms,
            otherwise,
            span,
        } => {
            // Insert a placeholder first so the Choice precedes its branch
            // bodies in the table and key collisions surface here.
            insert_state(
                states,
                State {
                    key: key.clone(),
                    comment: None,
                    transition: None,
                    kind: StateKind::Choice(ChoiceState {
                        branches: Vec::new(),
                        default: String::new(),
                    }),
                },
                span,
            )?;

            let mut synthesized_end = None;
            let mut branches = Vec::with_capacity(arms.len());
            for arm in arms {
                if arm.body.is_empty() {
                    return Err(CompileError::shape(
                        arm.span,
                        "choice branches must contain at least one state",
                    ));
                }
                let next = link_body(arm.body, cont.clone(), states, keys)?;
                branches.push(ChoiceBranch {
                    rule: arm.rule,
                    next,
                });
            }
            let default = match otherwise {
                Some(body) if !body.is_empty() => link_body(body, cont.clone(), states, keys)?,
                _ => continuation_key(&cont, states, keys, &mut synthesized_end),
            };

            let state = states.get_mut(&key).expect("placeholder inserted above");
            if let StateKind::Choice(choice) = &mut state.kind {
                choice.branches = branches;
                choice.default = default;
            }
            Ok(())
        }
        Fragment::Guarded {
            body,
            handlers,
            span,
        } => {
            if body.is_empty() {
                return Err(CompileError::shape(
                    span,
                    "error handling requires a task statement in the try body",
                ));
            }
            let first_key = link_body(body, cont.clone(), states, keys)?;

            let mut synthesized_end = None;
            let mut catches = Vec::with_capacity(handlers.len());
            for handler in handlers {
                let next = if handler.body.is_empty() {
                    continuation_key(&cont, states, keys, &mut synthesized_end)
                } else {
                    link_body(handler.body, cont.clone(), states, keys)?
                };
                catches.push(Catch {
                    error_equals: handler.errors,
                    next,
                });
            }

            let state = states.get_mut(&first_key).expect("body linked above");
            let StateKind::Task(task) = &mut state.kind else {
                return Err(CompileError::shape(
                    span,
                    "only task states can have exception handlers",
                ));
            };
            task.catch.extend(catches);
            Ok(())
        }
    }
}

/// Resolve a continuation to a concrete state key.
///
/// When the continuation is the end of the sub-machine there is no state to
/// point at, so a terminal Pass state is synthesized once and shared.
fn continuation_key(
    cont: &Continuation,
    states: &mut IndexMap<String, State>,
    keys: &mut KeyGen,
    synthesized: &mut Option<String>,
) -> String {
    match cont {
        Continuation::Key(key) => key.clone(),
        Continuation::End => {
            if let Some(key) = synthesized {
                return key.clone();
            }
            let key = keys.fresh("Pass");
            states.insert(
                key.clone(),
                State {
                    key: key.clone(),
                    comment: None,
                    transition: Some(Transition::End),
                    kind: StateKind::Pass(PassState {
                        result: None,
                        result_path: None,
                    }),
                },
            );
            *synthesized = Some(key.clone());
            key
        }
    }
}

fn insert_state(states: &mut IndexMap<String, State>, state: State, span: Span) -> Result<()> {
    if states.contains_key(&state.key) {
        return Err(CompileError::key_collision(
            span,
            format!(
                "state key `{}` is already used in this sub-machine",
                state.key
            ),
        ));
    }
    states.insert(state.key.clone(), state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FailState, WaitState};
    use crate::visitor::{ChoiceArm, Handler};
    use crate::ir::ChoiceRule;
    use crate::ir::{CompareOp, CompareValue};

    fn wait_fragment(keys: &mut KeyGen, seconds: u32) -> Fragment {
        let key = keys.fresh("Wait");
        Fragment::State {
            state: State {
                key: key.clone(),
                comment: None,
                transition: None,
                kind: StateKind::Wait(WaitState::Seconds(seconds)),
            },
            span: Span::default(),
        }
    }

    fn sample_rule() -> ChoiceRule {
        ChoiceRule::Compare {
            variable: "$['n']".into(),
            op: CompareOp::NumericEquals,
            value: CompareValue::Int(1),
        }
    }

    #[test]
    fn empty_body_links_to_single_succeed() {
        let mut keys = KeyGen::new();
        let machine = link(Vec::new(), &mut keys).expect("link");
        assert_eq!(machine.start_key, "Succeed-1");
        assert_eq!(machine.states.len(), 1);
        assert!(machine.start().unwrap().transition.is_none());
    }

    #[test]
    fn sequential_states_chain_and_last_ends() {
        let mut keys = KeyGen::new();
        let fragments = vec![wait_fragment(&mut keys, 1), wait_fragment(&mut keys, 2)];
        let machine = link(fragments, &mut keys).expect("link");
        assert_eq!(machine.start_key, "Wait-1");
        assert_eq!(machine.states["Wait-1"].next_key(), Some("Wait-2"));
        assert_eq!(
            machine.states["Wait-2"].transition,
            Some(Transition::End)
        );
    }

    #[test]
    fn terminal_states_receive_no_transition() {
        let mut keys = KeyGen::new();
        let key = keys.fresh("Fail");
        let fragments = vec![Fragment::State {
            state: State {
                key: key.clone(),
                comment: None,
                transition: None,
                kind: StateKind::Fail(FailState {
                    error: "Boom".into(),
                    cause: None,
                }),
            },
            span: Span::default(),
        }];
        let machine = link(fragments, &mut keys).expect("link");
        assert!(machine.states[&key].transition.is_none());
    }

    #[test]
    fn choice_without_else_synthesizes_terminal_default() {
        let mut keys = KeyGen::new();
        let choice_key = keys.fresh("Choice");
        let arm_body = vec![wait_fragment(&mut keys, 5)];
        let fragments = vec![Fragment::Choice {
            key: choice_key.clone(),
            arms: vec![ChoiceArm {
                rule: sample_rule(),
                body: arm_body,
                span: Span::default(),
            }],
            otherwise: None,
            span: Span::default(),
        }];
        let machine = link(fragments, &mut keys).expect("link");
        let StateKind::Choice(choice) = &machine.states[&choice_key].kind else {
            panic!("expected choice");
        };
        let default = &machine.states[&choice.default];
        assert!(matches!(default.kind, StateKind::Pass(_)));
        assert_eq!(default.transition, Some(Transition::End));
    }

    #[test]
    fn choice_without_else_defaults_to_continuation() {
        let mut keys = KeyGen::new();
        let choice_key = keys.fresh("Choice");
        let arm_body = vec![wait_fragment(&mut keys, 5)];
        let after = wait_fragment(&mut keys, 9);
        let after_key = match &after {
            Fragment::State { state, .. } => state.key.clone(),
            _ => unreachable!(),
        };
        let fragments = vec![
            Fragment::Choice {
                key: choice_key.clone(),
                arms: vec![ChoiceArm {
                    rule: sample_rule(),
                    body: arm_body,
                    span: Span::default(),
                }],
                otherwise: None,
                span: Span::default(),
            },
            after,
        ];
        let machine = link(fragments, &mut keys).expect("link");
        let StateKind::Choice(choice) = &machine.states[&choice_key].kind else {
            panic!("expected choice");
        };
        assert_eq!(choice.default, after_key);
        // The arm body falls through to the continuation as well.
        assert_eq!(
            machine.states["Wait-1"].next_key(),
            Some(after_key.as_str())
        );
    }

    #[test]
    fn duplicate_keys_collide() {
        let mut keys = KeyGen::new();
        let make = |key: &str| Fragment::State {
            state: State {
                key: key.to_string(),
                comment: None,
                transition: None,
                kind: StateKind::Wait(WaitState::Seconds(1)),
            },
            span: Span::default(),
        };
        let err = link(vec![make("dup"), make("dup")], &mut keys).unwrap_err();
        assert!(err.message().contains("dup"));
    }

    #[test]
    fn empty_handler_body_targets_continuation() {
        let mut keys = KeyGen::new();
        let task_key = keys.fresh("Task");
        let task = Fragment::State {
            state: State {
                key: task_key.clone(),
                comment: None,
                transition: None,
                kind: StateKind::Task(crate::ir::TaskState {
                    task_name: "Foo".into(),
                    service: crate::tasks::Service::Lambda,
                    resource: "${LambdaFunctionFoo}".into(),
                    parameters: serde_json::json!({}),
                    input_path: "$".into(),
                    result_path: None,
                    timeout_seconds: 300,
                    heartbeat_seconds: None,
                    retry: Vec::new(),
                    catch: Vec::new(),
                }),
            },
            span: Span::default(),
        };
        let fragments = vec![Fragment::Guarded {
            body: vec![task],
            handlers: vec![Handler {
                errors: vec!["States.ALL".into()],
                body: Vec::new(),
                span: Span::default(),
            }],
            span: Span::default(),
        }];
        let machine = link(fragments, &mut keys).expect("link");
        let StateKind::Task(task) = &machine.states[&task_key].kind else {
            panic!("expected task");
        };
        let target = &machine.states[&task.catch[0].next];
        assert!(matches!(target.kind, StateKind::Pass(_)));
        assert_eq!(target.transition, Some(Transition::End));
    }
}

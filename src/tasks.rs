//! Task definitions and the service-specific task state family.
//!
//! A task class in the project source declares *what* runs (its verbatim
//! entry method) and *where* it runs (the `service` attribute). This module
//! parses those classes into [`TaskDefinition`]s and builds the
//! service-specific parts of a task state: the ASL `Resource` and the
//! `Parameters` template that threads execution metadata and tracing fields
//! through to the running task.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ast::{ExprKind, Span, Stmt, StmtKind, TaskBody};
use crate::ir::TaskState;
use crate::{CompileError, Result};

/// Service integration a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Service {
    /// Synchronous Lambda invocation.
    Lambda,
    /// Lambda via the shared PEX package-manager runner function.
    LambdaPexpmRunner,
    /// Synchronous Fargate container run.
    Ecs,
    /// Queue-fed worker container using the wait-for-task-token pattern.
    EcsWorker,
}

impl Service {
    /// Parse the `service` class attribute value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lambda" => Some(Service::Lambda),
            "lambda:pexpm-runner" => Some(Service::LambdaPexpmRunner),
            "ecs" => Some(Service::Ecs),
            "ecs:worker" => Some(Service::EcsWorker),
            _ => None,
        }
    }

    /// The attribute spelling of this service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Lambda => "lambda",
            Service::LambdaPexpmRunner => "lambda:pexpm-runner",
            Service::Ecs => "ecs",
            Service::EcsWorker => "ecs:worker",
        }
    }

    /// True for the container-backed services.
    pub fn is_ecs(&self) -> bool {
        matches!(self, Service::Ecs | Service::EcsWorker)
    }

    /// True when the service can return a value into the data document.
    pub fn returns_result(&self) -> bool {
        matches!(self, Service::Lambda | Service::LambdaPexpmRunner)
    }
}

/// Compile-time descriptor of a user task class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// PascalCase class name.
    pub name: String,
    /// Service integration.
    pub service: Service,
    /// Default state timeout in seconds.
    pub timeout: u32,
    /// Fargate CPU units; only meaningful for the ecs services.
    pub cpu: u32,
    /// Memory in MiB.
    pub memory: u32,
    /// Verbatim entry-method source; absent for `ecs:worker`.
    pub run_body: Option<TaskBody>,
    /// Worker entry point in `package.module:Class` form.
    pub spec: Option<String>,
    /// Messages a single worker processes concurrently.
    pub concurrency: u32,
    /// Worker heartbeat interval in seconds; must stay below the timeout.
    pub heartbeat_interval: Option<u32>,
    /// Minimum worker count for autoscaling.
    pub autoscaling_min: Option<u32>,
    /// Maximum worker count for autoscaling.
    pub autoscaling_max: Option<u32>,
}

/// Parse a `class Name(Task):` body into a validated [`TaskDefinition`].
pub fn parse_task_class(name: &str, body: &[Stmt], span: Span) -> Result<TaskDefinition> {
    if !name.starts_with(|ch: char| ch.is_ascii_uppercase()) {
        return Err(CompileError::attribute(
            span,
            format!("task class names must be PascalCase, found `{name}`"),
        ));
    }

    let mut service = None;
    let mut timeout = None;
    let mut cpu = None;
    let mut memory = None;
    let mut spec = None;
    let mut concurrency = None;
    let mut heartbeat_interval = None;
    let mut autoscaling_min = None;
    let mut autoscaling_max = None;
    let mut run_body = None;

    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let Some(attr) = target.as_name() else {
                    return Err(CompileError::unsupported(
                        stmt.span,
                        "task class bodies may only assign class attributes",
                    ));
                };
                match attr {
                    "service" => {
                        let text = expect_str(value, "service")?;
                        service = Some(Service::parse(&text).ok_or_else(|| {
                            CompileError::attribute(
                                value.span,
                                format!(
                                    "allowed values for `service` include: lambda, \
                                     lambda:pexpm-runner, ecs, ecs:worker; found `{text}`"
                                ),
                            )
                        })?);
                    }
                    "timeout" => timeout = Some(expect_positive_int(value, "timeout")?),
                    "cpu" => cpu = Some(expect_positive_int(value, "cpu")?),
                    "memory" => memory = Some(expect_positive_int(value, "memory")?),
                    "spec" => spec = Some(expect_str(value, "spec")?),
                    "concurrency" => {
                        concurrency = Some(expect_positive_int(value, "concurrency")?)
                    }
                    "heartbeat_interval" => {
                        heartbeat_interval =
                            Some(expect_positive_int(value, "heartbeat_interval")?)
                    }
                    "autoscaling_min" => {
                        autoscaling_min = Some(expect_positive_int(value, "autoscaling_min")?)
                    }
                    "autoscaling_max" => {
                        autoscaling_max = Some(expect_positive_int(value, "autoscaling_max")?)
                    }
                    other => {
                        return Err(CompileError::attribute(
                            stmt.span,
                            format!("unknown task class attribute `{other}`"),
                        ));
                    }
                }
            }
            StmtKind::AsyncFunctionDef { name: method, body, .. } => {
                if method != "run" {
                    return Err(CompileError::unsupported(
                        stmt.span,
                        "task classes should only define a `run` method",
                    ));
                }
                run_body = Some(body.clone());
            }
            StmtKind::Expr(expr) if matches!(expr.kind, ExprKind::Str(_)) => {}
            StmtKind::Pass => {}
            _ => {
                return Err(CompileError::unsupported(
                    stmt.span,
                    "task class bodies may only contain attributes and a `run` method",
                ));
            }
        }
    }

    let service = service.unwrap_or(Service::Lambda);
    let timeout = timeout.unwrap_or(300);

    if service != Service::EcsWorker {
        for (label, set) in [
            ("spec", spec.is_some()),
            ("concurrency", concurrency.is_some()),
            ("heartbeat_interval", heartbeat_interval.is_some()),
            ("autoscaling_min", autoscaling_min.is_some()),
            ("autoscaling_max", autoscaling_max.is_some()),
        ] {
            if set {
                return Err(CompileError::attribute(
                    span,
                    format!("`{label}` only applies to ecs:worker tasks"),
                ));
            }
        }
    }

    let definition = TaskDefinition {
        name: name.to_string(),
        service,
        timeout,
        cpu: cpu.unwrap_or(1024),
        memory: memory.unwrap_or(2048),
        run_body: if service == Service::EcsWorker {
            None
        } else {
            run_body
        },
        spec,
        concurrency: concurrency.unwrap_or(1),
        heartbeat_interval,
        autoscaling_min,
        autoscaling_max,
    };
    validate(&definition, span)?;
    Ok(definition)
}

fn validate(def: &TaskDefinition, span: Span) -> Result<()> {
    match def.service {
        Service::Lambda | Service::LambdaPexpmRunner => {
            if def.memory < 128 || def.memory > 10_240 || def.memory % 64 != 0 {
                return Err(CompileError::attribute(
                    span,
                    format!(
                        "lambda memory must be a 64 MiB multiple between 128 and 10240, \
                         found {}",
                        def.memory
                    ),
                ));
            }
            if def.run_body.is_none() {
                return Err(CompileError::attribute(
                    span,
                    format!("task class {} is missing an async `run` method", def.name),
                ));
            }
        }
        Service::Ecs => {
            check_fargate_pair(def, span)?;
            if def.run_body.is_none() {
                return Err(CompileError::attribute(
                    span,
                    format!("task class {} is missing an async `run` method", def.name),
                ));
            }
        }
        Service::EcsWorker => {
            check_fargate_pair(def, span)?;
            let Some(spec) = &def.spec else {
                return Err(CompileError::attribute(
                    span,
                    "ecs:worker tasks require a `spec` attribute",
                ));
            };
            if !valid_worker_spec(spec) {
                return Err(CompileError::attribute(
                    span,
                    format!("`spec` must look like `package.module:Class`, found `{spec}`"),
                ));
            }
            if !(1..=100).contains(&def.concurrency) {
                return Err(CompileError::attribute(
                    span,
                    format!("`concurrency` must be between 1 and 100, found {}", def.concurrency),
                ));
            }
            if let Some(heartbeat) = def.heartbeat_interval {
                if heartbeat >= def.timeout {
                    return Err(CompileError::attribute(
                        span,
                        format!(
                            "`heartbeat_interval` ({heartbeat}) must be less than the task \
                             timeout ({})",
                            def.timeout
                        ),
                    ));
                }
            }
            if let (Some(min), Some(max)) = (def.autoscaling_min, def.autoscaling_max) {
                if min > max {
                    return Err(CompileError::attribute(
                        span,
                        format!("`autoscaling_min` ({min}) exceeds `autoscaling_max` ({max})"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_fargate_pair(def: &TaskDefinition, span: Span) -> Result<()> {
    let ok = match def.cpu {
        256 => matches!(def.memory, 512 | 1024 | 2048),
        512 => def.memory % 1024 == 0 && (1024..=4096).contains(&def.memory),
        1024 => def.memory % 1024 == 0 && (2048..=8192).contains(&def.memory),
        2048 => def.memory % 1024 == 0 && (4096..=16_384).contains(&def.memory),
        4096 => def.memory % 1024 == 0 && (8192..=30_720).contains(&def.memory),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CompileError::attribute(
            span,
            format!(
                "cpu/memory pair {}/{} is not a valid Fargate configuration",
                def.cpu, def.memory
            ),
        ))
    }
}

fn valid_worker_spec(spec: &str) -> bool {
    let Some((module, class)) = spec.split_once(':') else {
        return false;
    };
    let module_ok = !module.is_empty()
        && module.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
                && !part.starts_with(|ch: char| ch.is_ascii_digit())
        });
    let class_ok = class.starts_with(|ch: char| ch.is_ascii_uppercase())
        && class.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    module_ok && class_ok
}

fn expect_str(expr: &crate::ast::Expr, attr: &str) -> Result<String> {
    match &expr.kind {
        ExprKind::Str(value) => Ok(value.clone()),
        _ => Err(CompileError::attribute(
            expr.span,
            format!("invalid data type for the `{attr}` attribute: expected a string"),
        )),
    }
}

fn expect_positive_int(expr: &crate::ast::Expr, attr: &str) -> Result<u32> {
    match &expr.kind {
        ExprKind::Int(value) if *value > 0 => u32::try_from(*value).map_err(|_| {
            CompileError::attribute(
                expr.span,
                format!("`{attr}` value {value} is out of range"),
            )
        }),
        _ => Err(CompileError::attribute(
            expr.span,
            format!("invalid data type for the `{attr}` attribute: expected a positive integer"),
        )),
    }
}

/// Build a task state for a call site, computing the service-specific
/// resource and parameter template.
pub fn create_task_state(
    def: &TaskDefinition,
    input_path: &str,
    result_path: Option<String>,
    timeout_override: Option<u32>,
    in_map_iterator: bool,
) -> TaskState {
    let (resource, parameters) = match def.service {
        Service::Lambda => (lambda_resource(&def.name), lambda_parameters(input_path)),
        Service::LambdaPexpmRunner => (
            lambda_resource(&def.name),
            pexpm_parameters(&def.name, input_path),
        ),
        Service::Ecs => (
            "arn:aws:states:::ecs:runTask.sync".to_string(),
            ecs_parameters(&def.name, input_path),
        ),
        Service::EcsWorker => (
            "arn:aws:states:::sqs:sendMessage.waitForTaskToken".to_string(),
            worker_parameters(&def.name, input_path, in_map_iterator),
        ),
    };
    TaskState {
        task_name: def.name.clone(),
        service: def.service,
        resource,
        parameters,
        input_path: input_path.to_string(),
        result_path,
        timeout_seconds: timeout_override.unwrap_or(def.timeout),
        heartbeat_seconds: if def.service == Service::EcsWorker {
            def.heartbeat_interval
        } else {
            None
        },
        retry: Vec::new(),
        catch: Vec::new(),
    }
}

fn lambda_resource(name: &str) -> String {
    format!("${{LambdaFunction{name}}}")
}

fn lambda_parameters(input_path: &str) -> Value {
    json!({
        "meta": {
            "sfn_execution_name.$": "$$.Execution.Name",
            "sfn_state_name.$": "$$.State.Name",
            "sfn_state_machine_name.$": "$$.StateMachine.Name",
            "trace_id.$": "$.__trace.id",
            "trace_source.$": "$.__trace.source",
        },
        "data.$": input_path,
    })
}

fn pexpm_parameters(name: &str, input_path: &str) -> Value {
    json!({
        "package_name": format!("${{PackageName{name}}}"),
        "package_version": format!("${{PackageVersion{name}}}"),
        "command": [format!("${{PackageName{name}}}"), "run"],
        "include_parent_environment": true,
        "return_stdout": true,
        "environment": {
            "SFN_EXECUTION_NAME.$": "$$.Execution.Name",
            "SFN_STATE_NAME.$": "$$.State.Name",
            "SFN_STATE_MACHINE_NAME.$": "$$.StateMachine.Name",
            "TRACE_ID.$": "$.__trace.id",
            "TRACE_SOURCE.$": "$.__trace.source",
            "SFN_INPUT_VALUE.$": input_path,
        },
    })
}

fn ecs_parameters(name: &str, input_path: &str) -> Value {
    let mut environment = vec![
        json!({"Name": "SFN_EXECUTION_NAME", "Value.$": "$$.Execution.Name"}),
        json!({"Name": "SFN_STATE_NAME", "Value.$": "$$.State.Name"}),
        json!({"Name": "SFN_STATE_MACHINE_NAME", "Value.$": "$$.StateMachine.Name"}),
        json!({"Name": "TRACE_ID", "Value.$": "$.__trace.id"}),
        json!({"Name": "TRACE_SOURCE", "Value.$": "$.__trace.source"}),
    ];
    if input_path != "$" {
        environment.push(json!({"Name": "SFN_INPUT_VALUE", "Value.$": input_path}));
    }
    json!({
        "LaunchType": "FARGATE",
        "Cluster": "${ECSClusterArn}",
        "TaskDefinition": format!("${{ECSTaskDefinition{name}}}"),
        "NetworkConfiguration": {
            "AwsvpcConfiguration": {
                "AssignPublicIp": "DISABLED",
                "SecurityGroups": [
                    "${DatabaseSecurityGroup}",
                    "${PrivateLoadBalancerSecurityGroup}",
                ],
                "Subnets": ["${Subnet0}", "${Subnet1}", "${Subnet2}", "${Subnet3}"],
            }
        },
        "Overrides": {
            "ContainerOverrides": [
                {"Name": name, "Environment": environment}
            ]
        },
    })
}

fn worker_parameters(name: &str, input_path: &str, in_map_iterator: bool) -> Value {
    // Each task gets its own message group so one execution's messages never
    // stall behind another's in the FIFO queue. Inside a map iterator the
    // item index joins the group id to keep fanned-out items independent.
    let message_group_id = if in_map_iterator {
        "States.Format('{}_{}_{}', $$.Execution.Name, $$.State.EnteredTime, $.context_index)"
    } else {
        "States.Format('{}_{}', $$.Execution.Name, $$.State.EnteredTime)"
    };
    json!({
        "QueueUrl": format!("${{QueueUrl{name}}}"),
        "MessageGroupId.$": message_group_id,
        "MessageAttributes": {
            "SFN_EXECUTION_NAME": {
                "DataType": "String",
                "StringValue.$": "$$.Execution.Name",
            },
            "SFN_STATE_NAME": {
                "DataType": "String",
                "StringValue.$": "$$.State.Name",
            },
            "SFN_STATE_MACHINE_NAME": {
                "DataType": "String",
                "StringValue.$": "$$.StateMachine.Name",
            },
            "TRACE_ID": {"DataType": "String", "StringValue.$": "$.__trace.id"},
            "TRACE_SOURCE": {"DataType": "String", "StringValue.$": "$.__trace.source"},
        },
        "MessageBody": {
            "Input.$": input_path,
            "TaskToken.$": "$$.Task.Token",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn parse_class(source: &str) -> Result<TaskDefinition> {
        let module = parse_module(source).expect("parse");
        let StmtKind::ClassDef { name, body, .. } = &module.body[0].kind else {
            panic!("expected class definition");
        };
        parse_task_class(name, body, module.body[0].span)
    }

    #[test]
    fn parses_defaults() {
        let def = parse_class(
            "class Foo(Task):\n    async def run(event, context):\n        return\n",
        )
        .expect("task");
        assert_eq!(def.service, Service::Lambda);
        assert_eq!(def.timeout, 300);
        assert_eq!(def.memory, 2048);
        assert!(def.run_body.is_some());
    }

    #[test]
    fn captures_run_body_source() {
        let def = parse_class(
            "class Foo(Task):\n    async def run(event, context):\n        return {\"answer\": 42}\n",
        )
        .expect("task");
        let body = def.run_body.expect("run body");
        assert_eq!(body.source, "return {\"answer\": 42}");
    }

    #[test]
    fn rejects_unknown_service() {
        let err = parse_class(
            "class Foo(Task):\n    service = \"fargate\"\n    async def run(event, context):\n        return\n",
        )
        .unwrap_err();
        assert!(err.message().contains("service"));
    }

    #[test]
    fn rejects_invalid_fargate_pair() {
        let err = parse_class(
            "class Foo(Task):\n    service = \"ecs\"\n    cpu = 256\n    memory = 4096\n    async def run(event, context):\n        return\n",
        )
        .unwrap_err();
        assert!(err.message().contains("Fargate"));
    }

    #[test]
    fn rejects_worker_without_spec() {
        let err = parse_class("class Foo(Task):\n    service = \"ecs:worker\"\n").unwrap_err();
        assert!(err.message().contains("spec"));
    }

    #[test]
    fn rejects_worker_concurrency_out_of_range() {
        let err = parse_class(
            "class Foo(Task):\n    service = \"ecs:worker\"\n    spec = \"pkg.mod:Worker\"\n    concurrency = 200\n",
        )
        .unwrap_err();
        assert!(err.message().contains("concurrency"));
    }

    #[test]
    fn rejects_heartbeat_at_or_above_timeout() {
        let err = parse_class(
            "class Foo(Task):\n    service = \"ecs:worker\"\n    spec = \"pkg.mod:Worker\"\n    timeout = 60\n    heartbeat_interval = 60\n",
        )
        .unwrap_err();
        assert!(err.message().contains("heartbeat_interval"));
    }

    #[test]
    fn rejects_autoscaling_min_above_max() {
        let err = parse_class(
            "class Foo(Task):\n    service = \"ecs:worker\"\n    spec = \"pkg.mod:Worker\"\n    autoscaling_min = 5\n    autoscaling_max = 2\n",
        )
        .unwrap_err();
        assert!(err.message().contains("autoscaling_min"));
    }

    #[test]
    fn rejects_worker_attributes_on_lambda() {
        let err = parse_class(
            "class Foo(Task):\n    concurrency = 2\n    async def run(event, context):\n        return\n",
        )
        .unwrap_err();
        assert!(err.message().contains("ecs:worker"));
    }

    #[test]
    fn accepts_well_formed_worker() {
        let def = parse_class(
            "class Foo(Task):\n    service = \"ecs:worker\"\n    spec = \"jobs.video:Encoder\"\n    cpu = 1024\n    memory = 2048\n    concurrency = 10\n    timeout = 600\n    heartbeat_interval = 30\n",
        )
        .expect("task");
        assert_eq!(def.service, Service::EcsWorker);
        assert_eq!(def.spec.as_deref(), Some("jobs.video:Encoder"));
        assert!(def.run_body.is_none());
    }

    #[test]
    fn rejects_malformed_worker_spec() {
        let err = parse_class(
            "class Foo(Task):\n    service = \"ecs:worker\"\n    spec = \"not a spec\"\n",
        )
        .unwrap_err();
        assert!(err.message().contains("package.module:Class"));
    }

    #[test]
    fn worker_group_id_includes_map_index_inside_iterator() {
        let def = parse_class(
            "class Foo(Task):\n    service = \"ecs:worker\"\n    spec = \"pkg.mod:Worker\"\n",
        )
        .expect("task");
        let outer = create_task_state(&def, "$", None, None, false);
        let inner = create_task_state(&def, "$", None, None, true);
        let group = |state: &TaskState| {
            state.parameters["MessageGroupId.$"]
                .as_str()
                .expect("group id")
                .to_string()
        };
        assert!(!group(&outer).contains("context_index"));
        assert!(group(&inner).contains("context_index"));
    }

    #[test]
    fn lambda_task_state_threads_input_path() {
        let def = parse_class(
            "class Foo(Task):\n    async def run(event, context):\n        return\n",
        )
        .expect("task");
        let state = create_task_state(&def, "$['input']", None, None, false);
        assert_eq!(state.resource, "${LambdaFunctionFoo}");
        assert_eq!(state.parameters["data.$"], "$['input']");
        assert_eq!(state.timeout_seconds, 300);
    }
}

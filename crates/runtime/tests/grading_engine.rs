//! End-to-end behaviour of the grading engine.

use std::time::{Duration, Instant};

use pystep_runtime::{
    EngineConfig, ExecutionStatus, GradingEngine, GradingRequest, GradingResponse, PolicyConfig, ValidationVerdict,
};

fn engine_with(modules: &str) -> GradingEngine {
    let config = EngineConfig::default().with_policy(PolicyConfig::from_csv(modules).unwrap());
    GradingEngine::new(config).unwrap()
}

fn engine() -> GradingEngine {
    engine_with("math,random,json,time")
}

#[test]
fn validator_rejects_disallowed_import() {
    let verdict = engine_with("math,random").validate_only("import os");
    assert!(matches!(verdict, ValidationVerdict::Rejected { .. }));
}

#[test]
fn validator_accepts_whitelisted_program() {
    let verdict = engine_with("math").validate_only("import math\nprint(1)");
    assert_eq!(verdict, ValidationVerdict::Accepted);
}

#[tokio::test]
async fn hello_world_passes() {
    let graded = engine()
        .execute_and_grade("print(\"Olá, mundo!\")", "Olá, mundo!", "", None)
        .await;
    assert_eq!(graded.execution.status, ExecutionStatus::Success);
    assert!(graded.passed);
    assert_eq!(graded.actual, "Olá, mundo!");
}

#[tokio::test]
async fn disallowed_import_is_never_run() {
    let graded = engine_with("math,random")
        .execute_and_grade("import os\nprint(os.listdir())", "", "", None)
        .await;
    assert_eq!(graded.execution.status, ExecutionStatus::Error);
    assert!(!graded.passed);
    assert!(graded.execution.error.contains("os"));
    assert!(graded.execution.output.is_empty());
    assert_eq!(graded.execution.execution_time_ms, 0.0);
}

#[tokio::test]
async fn infinite_loop_times_out_at_deadline() {
    let result = engine()
        .execute("while True: pass", "", Some(Duration::from_millis(100)))
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.execution_time_ms, 100.0);
    assert!(result.error.contains("time"));
}

#[tokio::test]
async fn partial_output_survives_timeout() {
    let result = engine()
        .execute("print(\"partial\")\nwhile True:\n    pass\n", "", Some(Duration::from_millis(50)))
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.error.contains("time limit"));
    assert!(result.output.contains("partial"));
}

#[tokio::test]
async fn stale_deadline_does_not_cut_later_run() {
    let engine = engine();
    let first = engine
        .execute("print('a')", "", Some(Duration::from_millis(50)))
        .await;
    assert!(first.is_success());

    let second = engine
        .execute("import time\ntime.sleep(0.2)\nprint('b')", "", Some(Duration::from_secs(2)))
        .await;
    assert!(second.is_success(), "{}", second.error);
    assert_eq!(second.output, "b\n");
}

#[tokio::test]
async fn timed_out_worker_stops_promptly() {
    let engine = engine();
    let started = Instant::now();
    let result = engine
        .execute("import time\nwhile True:\n    time.sleep(10)\n", "", Some(Duration::from_millis(50)))
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(started.elapsed() < Duration::from_secs(5));

    let next = engine.execute("print(sum(range(10)))", "", None).await;
    assert_eq!(next.output, "45\n");
}

#[tokio::test]
async fn comparison_trims_only() {
    let engine = engine();
    let graded = engine.execute_and_grade("print('8')", " 8 \n", "", None).await;
    assert!(graded.passed);

    let graded = engine.execute_and_grade("print('08')", "8", "", None).await;
    assert!(!graded.passed);
    assert_eq!(graded.actual, "08");
    assert_eq!(graded.expected, "8");
}

#[tokio::test]
async fn grading_is_idempotent() {
    let engine = engine();
    let source = "import random\nxs = [random.randint(1, 6) for _ in range(4)]\nprint(sorted(xs))";
    let mut first = engine.execute_and_grade(source, "[1, 2, 3, 4]", "", None).await;
    let mut second = engine.execute_and_grade(source, "[1, 2, 3, 4]", "", None).await;
    first.execution.execution_time_ms = 0.0;
    second.execution.execution_time_ms = 0.0;
    assert_eq!(first, second);
}

#[tokio::test]
async fn runs_do_not_share_state() {
    let engine = engine();
    let source = "\
def add(item, bucket=[]):
    bucket.append(item)
    return bucket
print(add(1))
print(add(2))
";
    let first = engine.execute(source, "", None).await;
    let second = engine.execute(source, "", None).await;
    assert_eq!(first.output, "[1]\n[1, 2]\n");
    assert_eq!(second.output, first.output);
}

#[tokio::test]
async fn runtime_fault_is_reported_with_kind() {
    let result = engine()
        .execute("total = 0\nprint('start')\nprint(total / 0)", "", None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.error, "ZeroDivisionError: division by zero");
    assert_eq!(result.output, "start\n");

    let result = engine().execute("print(undefined)", "", None).await;
    assert_eq!(result.error, "NameError: name 'undefined' is not defined");
}

#[tokio::test]
async fn banned_capabilities_are_absent_even_indirectly() {
    let engine = engine();
    let direct = engine.execute("open('secret.txt')", "", None).await;
    assert!(direct.error.contains("'open' is not allowed"));

    let indirect = engine.execute("f = eval\nprint(f('1 + 1'))", "", None).await;
    assert_eq!(indirect.status, ExecutionStatus::Error);
    assert_eq!(indirect.error, "NameError: name 'eval' is not defined");

    let dunder = engine
        .execute("print((1).__class__.__bases__)", "", None)
        .await;
    assert_eq!(dunder.status, ExecutionStatus::Error);
}

#[tokio::test]
async fn allowed_but_unprovided_module_fails_at_run_time() {
    let result = engine_with("math,datetime")
        .execute("import datetime\nprint(datetime)", "", None)
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.error, "ModuleNotFoundError: No module named 'datetime'");
}

#[tokio::test]
async fn input_is_the_same_on_every_read() {
    let result = engine()
        .execute("a = input()\nb = input('again? ')\nprint(a == b, a)", "42\n", None)
        .await;
    assert_eq!(result.output, "True 42\n");
}

#[tokio::test]
async fn deep_recursion_is_a_fault() {
    let source = "def down(n):\n    return down(n + 1)\ndown(0)";
    let result = engine().execute(source, "", None).await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.error.starts_with("RecursionError"), "{}", result.error);
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let engine = engine();
    let mut handles = Vec::new();
    for n in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let request = GradingRequest::new(format!("print({} * {})", n, n)).with_expected_output((n * n).to_string());
            engine.handle(&request).await
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            GradingResponse::Graded(graded) => assert!(graded.passed),
            other => panic!("expected a graded response, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn typical_exercise() {
    let source = "\
def media(notas):
    return sum(notas) / len(notas)

valores = [float(x) for x in input().split()]
m = media(valores)
situacao = 'aprovado' if m >= 7 else 'reprovado'
print(f'Média: {m:.1f} - {situacao}')
";
    let graded = engine()
        .execute_and_grade(source, "Média: 7.5 - aprovado\n", "7 8 7.5\n", None)
        .await;
    assert!(graded.passed, "{:?}", graded);
}

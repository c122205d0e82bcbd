//! Compute actor tests on the emulated CPU backend.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use clactor::config::load_config_from_str;
use clactor::cpu::FaultPoint;
use clactor::prelude::*;

use common::*;

const MATRIX_EXPECTED: [i32; 16] = [
    56, 62, 68, 74, 152, 174, 196, 218, 248, 286, 324, 362, 344, 398, 452, 506,
];

fn matrix_args() -> [Arg; 2] {
    [Arg::input::<i32>(), Arg::output::<i32>()]
}

#[tokio::test]
async fn test_matrix_square() {
    let registry = registry();
    let program = Program::create(&registry, MATRIX_SQUARE, None, 0).unwrap();
    let actor = spawn(
        &program,
        "matrix_square",
        SpawnConfig::new([MATRIX_SIZE, MATRIX_SIZE]),
        matrix_args(),
    )
    .unwrap();

    let reply = actor
        .ask((iota(MATRIX_SIZE * MATRIX_SIZE),), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(reply.len(), 1);
    assert_eq!(reply.get::<Vec<i32>>(0).unwrap(), &MATRIX_EXPECTED.to_vec());

    let stats = wait_for_stats(&actor, |s| s.completed == 1).await;
    assert_eq!(stats.received, 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_matrix_square_from_source() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        MATRIX_SQUARE,
        "matrix_square",
        SpawnConfig::new([MATRIX_SIZE, MATRIX_SIZE]),
        matrix_args(),
    )
    .unwrap();

    let mut inbox = Inbox::new();
    let correlation = inbox
        .send(&actor, (iota(MATRIX_SIZE * MATRIX_SIZE),))
        .await
        .unwrap();

    let reply = inbox.receive(TIMEOUT).await.unwrap();
    assert_eq!(reply.correlation, correlation);
    assert_eq!(reply.from, actor.id());
    assert_eq!(
        reply.content.get::<Vec<i32>>(0).unwrap(),
        &MATRIX_EXPECTED.to_vec()
    );
}

#[derive(Debug, Clone, PartialEq)]
struct SquareMatrix {
    data: Vec<i32>,
}

#[tokio::test]
async fn test_mapped_matrix_square() {
    let registry = registry();
    let program = Program::create(&registry, MATRIX_SQUARE, None, 0).unwrap();
    let actor = ComputeActor::builder(
        program,
        "matrix_square",
        SpawnConfig::new([MATRIX_SIZE, MATRIX_SIZE]),
    )
    .args(matrix_args())
    .map_input(|msg| {
        msg.get::<SquareMatrix>(0)
            .map(|matrix| Message::new().with(matrix.data.clone()))
    })
    .map_output(|msg| match msg.get_cloned::<Vec<i32>>(0) {
        Some(data) => Message::new().with(SquareMatrix { data }),
        None => msg,
    })
    .spawn()
    .unwrap();

    let input = SquareMatrix {
        data: iota(MATRIX_SIZE * MATRIX_SIZE),
    };
    let reply = actor.ask((input,), TIMEOUT).await.unwrap();
    assert_eq!(
        reply.get::<SquareMatrix>(0),
        Some(&SquareMatrix {
            data: MATRIX_EXPECTED.to_vec()
        })
    );

    // The unmapped form is rejected by the input mapper.
    let err = actor
        .ask((iota(MATRIX_SIZE * MATRIX_SIZE),), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));
    let stats = wait_for_stats(&actor, |s| s.unmatched == 1).await;
    assert_eq!(stats.unmatched, 1);
}

#[test]
fn test_compile_error_carries_diagnostic() {
    let registry = registry();
    match Program::create(&registry, MISSING_SEMICOLON, None, 0) {
        Err(ComputeError::Compile { status, diagnostic }) => {
            assert_eq!(status, Status::BUILD_PROGRAM_FAILURE);
            assert!(diagnostic.contains("expected ';'"), "{}", diagnostic);
        }
        other => panic!("expected a compile error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_invalid_build_options() {
    let registry = registry();
    let err = Program::create(&registry, COPY, Some("--fast"), 0).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::Compile {
            status: Status::INVALID_BUILD_OPTIONS,
            ..
        }
    ));
}

#[tokio::test]
async fn test_compiler_flag() {
    let registry = registry();
    let input = iota(ARRAY_SIZE);

    let with_flag = Program::create(&registry, COMPILER_FLAG_SOURCE, Some(COMPILER_FLAG), 0).unwrap();
    let actor = spawn(
        &with_flag,
        "compiler_flag",
        SpawnConfig::new([ARRAY_SIZE]),
        [Arg::input::<i32>(), Arg::output::<i32>()],
    )
    .unwrap();
    let reply = actor.ask((input.clone(),), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&input));

    let without_flag = Program::create(&registry, COMPILER_FLAG_SOURCE, None, 0).unwrap();
    let actor = spawn(
        &without_flag,
        "compiler_flag",
        SpawnConfig::new([ARRAY_SIZE]),
        [Arg::input::<i32>(), Arg::output::<i32>()],
    )
    .unwrap();
    let reply = actor.ask((input,), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![0; ARRAY_SIZE]));
}

#[tokio::test]
async fn test_reduce_with_local_dimensions() {
    let registry = registry();
    let device = registry.device(0).unwrap();
    let groups = 8;
    let work_group = device.max_local_size(0, 512);
    assert!(work_group > 0);
    assert!(device.fits_local_dimensions(&[work_group]));
    assert!(!device.fits_local_dimensions(&[device.max_work_group_size() + 1]));

    let len = work_group * groups;
    let values: Vec<i32> = (0..len as i32).rev().collect();

    let program = Program::create(&registry, REDUCE, None, 0).unwrap();
    let actor = spawn(
        &program,
        "reduce",
        SpawnConfig::new([len]).with_local_dimensions([work_group]),
        [
            Arg::input::<i32>(),
            Arg::output_sized::<i32, _>(move |_| groups),
        ],
    )
    .unwrap();

    let reply = actor.ask((values,), TIMEOUT).await.unwrap();
    let expected: Vec<i32> = (0..groups as i32)
        .rev()
        .map(|g| g * work_group as i32)
        .collect();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&expected));
}

fn first_value(msg: &Message) -> usize {
    msg.get::<Vec<i32>>(0)
        .and_then(|values| values.first())
        .map_or(0, |&n| n as usize)
}

#[tokio::test]
async fn test_output_size_from_request() {
    let registry = registry();
    let program = Program::create(&registry, CONST_MOD, None, 0).unwrap();
    let actor = spawn(
        &program,
        "const_mod",
        SpawnConfig::new([PROBLEM_SIZE]),
        [
            Arg::input::<i32>(),
            Arg::output_sized::<i32, _>(first_value),
        ],
    )
    .unwrap();

    let reply = actor.ask((vec![8],), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![8; 8]));

    let reply = actor.ask((vec![3],), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![3; 3]));
}

#[tokio::test]
async fn test_output_size_sees_mapped_request() {
    let registry = registry();
    let program = Program::create(&registry, CONST_MOD, None, 0).unwrap();
    let actor = ComputeActor::builder(program, "const_mod", SpawnConfig::new([PROBLEM_SIZE]))
        .args([
            Arg::input::<i32>(),
            Arg::output_sized::<i32, _>(first_value),
        ])
        .map_input(|msg| {
            msg.get::<u32>(0)
                .map(|&n| Message::new().with(vec![n as i32]))
        })
        .spawn()
        .unwrap();

    let reply = actor.ask((8u32,), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0).map(Vec::len), Some(8));
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![8; 8]));
}

#[tokio::test]
async fn test_in_out_argument() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        TIMES_TWO,
        "times_two",
        SpawnConfig::new([PROBLEM_SIZE]),
        [Arg::in_out::<i32>()],
    )
    .unwrap();

    let reply = actor.ask((iota(PROBLEM_SIZE),), TIMEOUT).await.unwrap();
    let expected: Vec<i32> = iota(PROBLEM_SIZE).into_iter().map(|x| x * 2).collect();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&expected));
}

#[tokio::test]
async fn test_outputs_keep_declared_order() {
    let registry = registry();
    let program = Program::create(&registry, SPLIT, None, 0).unwrap();
    let actor = spawn(
        &program,
        "split",
        SpawnConfig::new([4]),
        [
            Arg::input::<i32>(),
            Arg::output::<i32>(),
            Arg::output::<i32>(),
        ],
    )
    .unwrap();

    let reply = actor.ask((vec![1, 2, 3, 4],), TIMEOUT).await.unwrap();
    assert_eq!(reply.len(), 2);
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![2, 3, 4, 5]));
    assert_eq!(reply.get::<Vec<i32>>(1), Some(&vec![10, 20, 30, 40]));
}

#[tokio::test]
async fn test_in_out_precedes_outputs_in_reply() {
    let registry = registry();
    let program = Program::create(&registry, COPY, None, 0).unwrap();
    let actor = spawn(
        &program,
        "copy",
        SpawnConfig::new([4]),
        [Arg::in_out::<i32>(), Arg::output::<i32>()],
    )
    .unwrap();

    let reply = actor.ask((vec![4, 3, 2, 1],), TIMEOUT).await.unwrap();
    assert_eq!(reply.len(), 2);
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![4, 3, 2, 1]));
    assert_eq!(reply.get::<Vec<i32>>(1), Some(&vec![4, 3, 2, 1]));
}

#[tokio::test]
async fn test_copy_various_sizes() {
    let registry = registry();
    let program = Program::create(&registry, COPY, None, 0).unwrap();

    for len in [1, 7, 64, 1000] {
        let actor = spawn(
            &program,
            "copy",
            SpawnConfig::new([len]),
            [Arg::input::<i32>(), Arg::output::<i32>()],
        )
        .unwrap();
        let input: Vec<i32> = (0..len as i32).map(|x| x * 3 - 7).collect();
        let reply = actor.ask((input.clone(),), TIMEOUT).await.unwrap();
        assert_eq!(reply.get::<Vec<i32>>(0), Some(&input), "len {}", len);
    }
}

#[tokio::test]
async fn test_unmatched_message_is_dropped() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        MATRIX_SQUARE,
        "matrix_square",
        SpawnConfig::new([MATRIX_SIZE, MATRIX_SIZE]),
        matrix_args(),
    )
    .unwrap();

    let err = actor.ask((vec![1.0f32; 16],), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));

    let err = actor.ask((iota(16), 5u32), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));

    let stats = wait_for_stats(&actor, |s| s.unmatched == 2).await;
    assert_eq!(stats.unmatched, 2);
    assert_eq!(stats.dispatched, 0);

    // Still serving matching requests.
    let reply = actor.ask((iota(16),), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0).unwrap(), &MATRIX_EXPECTED.to_vec());
}

#[tokio::test]
async fn test_spawn_config_errors() {
    let registry = registry();
    let program = Program::create(&registry, COPY, None, 0).unwrap();
    let args = || [Arg::input::<i32>(), Arg::output::<i32>()];

    let err = spawn(&program, "copy", SpawnConfig::new(Vec::<usize>::new()), args()).unwrap_err();
    assert!(err.is_config());

    let err = spawn(
        &program,
        "copy",
        SpawnConfig::new([16]).with_offsets([0, 0]),
        args(),
    )
    .unwrap_err();
    assert!(err.is_config());

    let err = spawn(
        &program,
        "copy",
        SpawnConfig::new([16, 16]).with_local_dimensions([4]),
        args(),
    )
    .unwrap_err();
    assert!(err.is_config());

    let err = spawn(&program, "copy", SpawnConfig::new([16]), []).unwrap_err();
    assert!(err.is_config());

    let err = ComputeActor::builder(program, "copy", SpawnConfig::new([16]))
        .args(args())
        .mailbox_capacity(0)
        .spawn()
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_unknown_kernel() {
    let registry = registry();
    let program = Program::create(&registry, COPY, None, 0).unwrap();

    let err = spawn(&program, "nope", SpawnConfig::new([16]), [Arg::in_out::<i32>()]).unwrap_err();
    assert!(matches!(err, ComputeError::KernelNotFound(ref name) if name == "nope"));
}

#[tokio::test]
async fn test_declared_kernel_without_host_function() {
    let registry = registry();
    let source = "__kernel void undefined_here(__global int* data) { data[0] = 1; }";
    let program = Program::create(&registry, source, None, 0).unwrap();

    let err = spawn(
        &program,
        "undefined_here",
        SpawnConfig::new([1]),
        [Arg::in_out::<i32>()],
    )
    .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_KERNEL));
}

#[test]
fn test_spawn_requires_runtime() {
    let registry = registry();
    let program = Program::create(&registry, COPY, None, 0).unwrap();
    let err = spawn(&program, "copy", SpawnConfig::new([4]), [Arg::in_out::<i32>()]).unwrap_err();
    assert!(matches!(err, ComputeError::NoRuntime(_)));
}

#[tokio::test]
async fn test_enqueue_failure_drops_request() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        TIMES_TWO,
        "times_two",
        SpawnConfig::new([16]),
        [Arg::in_out::<i32>()],
    )
    .unwrap();

    registry
        .backend()
        .inject_fault(FaultPoint::EnqueueKernel, Status::OUT_OF_RESOURCES);
    let err = actor.ask((iota(16),), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));

    let stats = wait_for_stats(&actor, |s| s.failed == 1).await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dispatched, 0);

    // The fault is one-shot; the actor keeps serving.
    let reply = actor.ask((iota(16),), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0).map(|v| v[15]), Some(30));
}

#[tokio::test]
async fn test_buffer_allocation_failure_drops_request() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        COPY,
        "copy",
        SpawnConfig::new([16]),
        [Arg::input::<i32>(), Arg::output::<i32>()],
    )
    .unwrap();

    registry
        .backend()
        .inject_fault(FaultPoint::CreateBuffer, Status::MEM_OBJECT_ALLOCATION_FAILURE);
    let err = actor.ask((iota(16),), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));

    // Zero-length inputs cannot be allocated either.
    let err = actor.ask((Vec::<i32>::new(),), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));

    let stats = wait_for_stats(&actor, |s| s.failed == 2).await;
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn test_device_failure_drops_request() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        TIMES_TWO,
        "times_two",
        SpawnConfig::new([16]),
        [Arg::in_out::<i32>()],
    )
    .unwrap();

    registry
        .backend()
        .inject_fault(FaultPoint::KernelExecution, Status::OUT_OF_RESOURCES);
    let err = actor.ask((iota(16),), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));

    let stats = wait_for_stats(&actor, |s| s.failed == 1).await;
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_kernel_fault_drops_request() {
    let backend = with_kernels(CpuBackend::builder())
        .kernel("faulty", |_| Err(KernelFault::Failed("boom".into())))
        .build();
    let registry = DeviceRegistry::with_defaults(backend);
    let actor = spawn_from_source(
        &registry,
        "__kernel void faulty(__global int* data) { data[0] = 1; }",
        "faulty",
        SpawnConfig::new([4]),
        [Arg::in_out::<i32>()],
    )
    .unwrap();

    let err = actor.ask((iota(4),), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));
    let stats = wait_for_stats(&actor, |s| s.failed == 1).await;
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_invalid_work_group_drops_request() {
    let registry = registry();
    let program = Program::create(&registry, COPY, None, 0).unwrap();
    // 10 is not a multiple of 4; rejected when the kernel is enqueued.
    let actor = spawn(
        &program,
        "copy",
        SpawnConfig::new([10]).with_local_dimensions([4]),
        [Arg::input::<i32>(), Arg::output::<i32>()],
    )
    .unwrap();

    let err = actor.ask((iota(10),), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ComputeError::NoReply));
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        COPY,
        "copy",
        SpawnConfig::new([8]),
        [Arg::input::<i32>(), Arg::output::<i32>()],
    )
    .unwrap();

    let mut inbox = Inbox::new();
    let mut expected = HashMap::new();
    for round in 0..16 {
        let input: Vec<i32> = (0..8).map(|x| x + round * 100).collect();
        let correlation = inbox.send(&actor, (input.clone(),)).await.unwrap();
        expected.insert(correlation, input);
    }

    for _ in 0..16 {
        let reply = inbox.receive(TIMEOUT).await.expect("missing reply");
        let input = expected.remove(&reply.correlation).expect("unknown correlation");
        assert_eq!(reply.content.get::<Vec<i32>>(0), Some(&input));
    }
    assert!(expected.is_empty());
    assert!(inbox.try_receive().is_none());
}

#[tokio::test]
async fn test_in_flight_command_outlives_actor_handle() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        TIMES_TWO,
        "times_two",
        SpawnConfig::new([64]),
        [Arg::in_out::<i32>()],
    )
    .unwrap();

    let mut inbox = Inbox::new();
    inbox.send(&actor, (iota(64),)).await.unwrap();
    drop(actor);

    let reply = inbox.receive(TIMEOUT).await.expect("reply after drop");
    assert_eq!(reply.content.get::<Vec<i32>>(0).map(|v| v[63]), Some(126));
}

#[tokio::test]
async fn test_fire_and_forget_request() {
    let registry = registry();
    let actor = spawn_from_source(
        &registry,
        TIMES_TWO,
        "times_two",
        SpawnConfig::new([8]),
        [Arg::in_out::<i32>()],
    )
    .unwrap();

    actor.send((iota(8),)).await.unwrap();
    actor.try_send((iota(8),), None).unwrap();

    let stats = wait_for_stats(&actor, |s| s.completed == 2).await;
    assert_eq!(stats.completed, 2);
}

#[test]
fn test_discovery_runs_once() {
    let backend = Arc::new(backend());
    let registry = DeviceRegistry::from_shared(Arc::clone(&backend), DiscoveryConfig::default());

    assert_eq!(registry.device_count().unwrap(), 1);
    assert_eq!(registry.devices().unwrap().len(), 1);
    assert_eq!(registry.device(0).unwrap().name(), "test gpu");
    assert_eq!(registry.device_kind().unwrap(), DeviceKind::Gpu);
    assert_eq!(backend.stats().platform_queries, 1);

    assert!(matches!(
        registry.device(1),
        Err(ComputeError::DeviceNotFound(1))
    ));
}

#[test]
fn test_failed_discovery_is_retried() {
    let backend = Arc::new(backend());
    let registry = DeviceRegistry::from_shared(Arc::clone(&backend), DiscoveryConfig::default());

    backend.inject_fault(FaultPoint::Platforms, Status::OUT_OF_HOST_MEMORY);
    let err = registry.devices().unwrap_err();
    assert_eq!(err.status(), Some(Status::OUT_OF_HOST_MEMORY));

    assert_eq!(registry.device_count().unwrap(), 1);
    assert_eq!(backend.stats().platform_queries, 2);
}

#[test]
fn test_cpu_fallback() {
    let backend = CpuBackend::builder()
        .device(CpuDeviceSpec::cpu("host cpu"))
        .build();
    let registry = DeviceRegistry::with_defaults(backend);

    assert_eq!(registry.device_kind().unwrap(), DeviceKind::Cpu);
    assert_eq!(registry.device(0).unwrap().name(), "host cpu");
}

#[test]
fn test_no_fallback_without_gpu() {
    let backend = CpuBackend::builder()
        .device(CpuDeviceSpec::cpu("host cpu"))
        .build();
    let config = DiscoveryConfig {
        fallback_to_cpu: false,
        ..DiscoveryConfig::default()
    };
    let registry = DeviceRegistry::new(backend, config);

    assert!(matches!(registry.devices(), Err(ComputeError::NoDevices(_))));
}

#[test]
fn test_gpu_preferred_over_cpu() {
    let backend = CpuBackend::builder()
        .device(CpuDeviceSpec::cpu("host cpu"))
        .device(CpuDeviceSpec::gpu("gpu"))
        .build();
    let registry = DeviceRegistry::with_defaults(backend);

    assert_eq!(registry.device_kind().unwrap(), DeviceKind::Gpu);
    assert_eq!(registry.device_count().unwrap(), 1);
    assert_eq!(registry.device(0).unwrap().name(), "gpu");
}

#[test]
fn test_device_without_queue_is_skipped() {
    let backend = CpuBackend::builder()
        .device(CpuDeviceSpec::gpu("broken").failing_queue_creation())
        .device(CpuDeviceSpec::gpu("working"))
        .build();
    let registry = DeviceRegistry::with_defaults(backend);

    assert_eq!(registry.device_count().unwrap(), 1);
    let device = registry.device(0).unwrap();
    assert_eq!(device.id(), 0);
    assert_eq!(device.name(), "working");
}

#[test]
fn test_no_usable_devices() {
    let backend = CpuBackend::builder()
        .device(CpuDeviceSpec::gpu("broken").failing_queue_creation())
        .build();
    let registry = DeviceRegistry::with_defaults(backend);

    assert!(matches!(registry.devices(), Err(ComputeError::NoDevices(_))));
}

fn two_platforms() -> CpuBackend {
    CpuBackend::builder()
        .platform(CpuPlatformSpec::new("first").device(CpuDeviceSpec::gpu("first gpu")))
        .platform(CpuPlatformSpec::new("second").device(CpuDeviceSpec::gpu("second gpu")))
        .build()
}

#[test]
fn test_platform_selection() {
    let config = DiscoveryConfig {
        platform_index: 1,
        ..DiscoveryConfig::default()
    };
    let registry = DeviceRegistry::new(two_platforms(), config);
    assert_eq!(registry.device(0).unwrap().name(), "second gpu");

    let config = DiscoveryConfig {
        platform_index: 5,
        ..DiscoveryConfig::default()
    };
    let registry = DeviceRegistry::new(two_platforms(), config);
    assert!(matches!(registry.devices(), Err(ComputeError::NoDevices(_))));
}

#[tokio::test]
async fn test_configured_build_options() {
    let config = load_config_from_str(
        r#"
        [discovery]
        preferred_device = "cpu"
        default_build_options = "-D COMPUTE_TEST_FLAG"

        [actor]
        mailbox_capacity = 8
        "#,
    )
    .unwrap();
    config.validate().unwrap();

    let backend = with_kernels(CpuBackend::builder().device(CpuDeviceSpec::cpu("host cpu"))).build();
    let registry = DeviceRegistry::new(backend, config.discovery.clone());
    let program = Program::create(&registry, COMPILER_FLAG_SOURCE, None, 0).unwrap();
    assert_eq!(program.options(), Some(COMPILER_FLAG));

    let actor = ComputeActor::builder(program, "compiler_flag", SpawnConfig::new([ARRAY_SIZE]))
        .args([Arg::input::<i32>(), Arg::output::<i32>()])
        .actor_config(&config.actor)
        .spawn()
        .unwrap();

    let reply = actor.ask((iota(ARRAY_SIZE),), TIMEOUT).await.unwrap();
    assert_eq!(reply.get::<Vec<i32>>(0), Some(&iota(ARRAY_SIZE)));
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Complex {
    re: f32,
    im: f32,
}

#[tokio::test]
async fn test_struct_elements() {
    let backend = with_kernels(CpuBackend::builder().device(CpuDeviceSpec::gpu("gpu")))
        .kernel("conjugate", |inv| {
            let count = inv.global_size(0);
            for value in &mut inv.write::<Complex>(0)?[..count] {
                value.im = -value.im;
            }
            Ok(())
        })
        .build();
    let registry = DeviceRegistry::with_defaults(backend);
    let actor = spawn_from_source(
        &registry,
        "typedef struct { float re; float im; } complex_t;\n\
         __kernel void conjugate(__global complex_t* values) {\n\
           size_t i = get_global_id(0);\n\
           values[i].im = -values[i].im;\n\
         }\n",
        "conjugate",
        SpawnConfig::new([3]),
        [Arg::in_out::<Complex>()],
    )
    .unwrap();

    let input = vec![
        Complex { re: 1.0, im: 2.0 },
        Complex { re: -3.0, im: 0.5 },
        Complex { re: 0.0, im: -1.0 },
    ];
    let reply = actor.ask((input,), TIMEOUT).await.unwrap();
    assert_eq!(
        reply.get::<Vec<Complex>>(0),
        Some(&vec![
            Complex { re: 1.0, im: -2.0 },
            Complex { re: -3.0, im: -0.5 },
            Complex { re: 0.0, im: 1.0 },
        ])
    );
}

//! Shared fixtures: kernel sources and an emulated backend implementing them.

#![allow(dead_code)]

use std::time::Duration;

use clactor::prelude::*;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const MATRIX_SIZE: usize = 4;
pub const ARRAY_SIZE: usize = 32;
pub const PROBLEM_SIZE: usize = 1024;

pub const COMPILER_FLAG: &str = "-D COMPUTE_TEST_FLAG";

pub const MATRIX_SQUARE: &str = r#"
  __kernel void matrix_square(__global int* matrix,
                              __global int* output) {
    size_t size = get_global_size(0);
    size_t x = get_global_id(0);
    size_t y = get_global_id(1);
    int result = 0;
    for (size_t idx = 0; idx < size; ++idx) {
      result += matrix[idx + y * size] * matrix[x + idx * size];
    }
    output[x + y * size] = result;
  }
"#;

pub const MISSING_SEMICOLON: &str = r#"
  __kernel void missing(__global int*) {
    size_t semicolon_missing
  }
"#;

pub const COMPILER_FLAG_SOURCE: &str = r#"
  __kernel void compiler_flag(__global int* input,
                              __global int* output) {
    size_t x = get_global_id(0);
#   ifdef COMPUTE_TEST_FLAG
    output[x] = input[x];
#   else
    output[x] = 0;
#   endif
  }
"#;

pub const REDUCE: &str = r#"
  __kernel void reduce(__global int* buffer,
                       __global int* result) {
    __local int scratch[512];
    int local_index = get_local_id(0);
    scratch[local_index] = buffer[get_global_id(0)];
    barrier(CLK_LOCAL_MEM_FENCE);
    for (int offset = get_local_size(0) / 2; offset > 0; offset = offset / 2) {
      if (local_index < offset) {
        int other = scratch[local_index + offset];
        int mine = scratch[local_index];
        scratch[local_index] = (mine < other) ? mine : other;
      }
      barrier(CLK_LOCAL_MEM_FENCE);
    }
    if (local_index == 0) {
      result[get_group_id(0)] = scratch[0];
    }
  }
"#;

pub const CONST_MOD: &str = r#"
  __kernel void const_mod(__constant int* input,
                          __global int* output) {
    size_t idx = get_global_id(0);
    output[idx] = input[0];
  }
"#;

pub const TIMES_TWO: &str = r#"
  __kernel void times_two(__global int* values) {
    size_t idx = get_global_id(0);
    values[idx] = values[idx] * 2;
  }
"#;

pub const SPLIT: &str = r#"
  __kernel void split(__global const int* input,
                      __global int* incremented,
                      __global int* scaled) {
    size_t idx = get_global_id(0);
    incremented[idx] = input[idx] + 1;
    scaled[idx] = input[idx] * 10;
  }
"#;

pub const COPY: &str = r#"
  __kernel void copy(__global const int* input,
                     __global int* output) {
    size_t idx = get_global_id(0);
    output[idx] = input[idx];
  }
"#;

/// Host implementations of every kernel above.
pub fn with_kernels(builder: clactor::cpu::CpuBackendBuilder) -> clactor::cpu::CpuBackendBuilder {
    builder
        .kernel("matrix_square", |inv| {
            let size = inv.global_size(0);
            let matrix = inv.read::<i32>(0)?;
            let ids = inv.global_ids();
            let output = inv.write::<i32>(1)?;
            for [x, y, _] in ids {
                output[x + y * size] = (0..size)
                    .map(|idx| matrix[idx + y * size] * matrix[x + idx * size])
                    .sum();
            }
            Ok(())
        })
        .kernel("compiler_flag", |inv| {
            let input = inv.read::<i32>(0)?;
            let flag = inv.is_defined("COMPUTE_TEST_FLAG");
            let output = inv.write::<i32>(1)?;
            for (x, out) in output.iter_mut().enumerate() {
                *out = if flag { input[x] } else { 0 };
            }
            Ok(())
        })
        .kernel("reduce", |inv| {
            let local = inv.local_size(0);
            let groups = inv.num_groups(0);
            let buffer = inv.read::<i32>(0)?;
            let result = inv.write::<i32>(1)?;
            for group in 0..groups {
                let scratch = &buffer[group * local..(group + 1) * local];
                result[group] = scratch.iter().copied().min().unwrap_or(i32::MAX);
            }
            Ok(())
        })
        .kernel("const_mod", |inv| {
            let input = inv.read::<i32>(0)?;
            let first = *input
                .first()
                .ok_or_else(|| KernelFault::Failed("empty constant buffer".into()))?;
            // Fills whatever the output buffer holds.
            inv.write::<i32>(1)?.fill(first);
            Ok(())
        })
        .kernel("split", |inv| {
            let input = inv.read::<i32>(0)?;
            let count = inv.global_size(0);
            for (out, value) in inv.write::<i32>(1)?[..count].iter_mut().zip(&input) {
                *out = value + 1;
            }
            for (out, value) in inv.write::<i32>(2)?[..count].iter_mut().zip(&input) {
                *out = value * 10;
            }
            Ok(())
        })
        .kernel("times_two", |inv| {
            let count = inv.global_size(0);
            for value in &mut inv.write::<i32>(0)?[..count] {
                *value *= 2;
            }
            Ok(())
        })
        .kernel("copy", |inv| {
            let input = inv.read::<i32>(0)?;
            let count = inv.global_size(0);
            inv.write::<i32>(1)?[..count].copy_from_slice(&input[..count]);
            Ok(())
        })
}

/// Emulated backend with one GPU-class device and all test kernels.
pub fn backend() -> CpuBackend {
    with_kernels(CpuBackend::builder().device(CpuDeviceSpec::gpu("test gpu"))).build()
}

/// Registry over [`backend`].
pub fn registry() -> DeviceRegistry<CpuBackend> {
    DeviceRegistry::with_defaults(backend())
}

pub fn iota(count: usize) -> Vec<i32> {
    (0..count as i32).collect()
}

/// Wait until `check` holds for the actor's counters.
pub async fn wait_for_stats(
    actor: &ActorRef,
    check: impl Fn(&ActorStatsSnapshot) -> bool,
) -> ActorStatsSnapshot {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let stats = actor.stats();
        if check(&stats) || tokio::time::Instant::now() >= deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

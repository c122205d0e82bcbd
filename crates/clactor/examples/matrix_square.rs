//! # Matrix Square Example
//!
//! Squares a 4x4 integer matrix with a compute actor.
//!
//! ## Run this example:
//! ```bash
//! cargo run -p clactor --example matrix_square
//! cargo run -p clactor --example matrix_square --features opencl
//! ```
//!
//! Without the `opencl` feature (or without an OpenCL driver) the kernel
//! runs on the emulated CPU backend, which needs a host implementation of
//! every kernel it launches.

use std::time::Duration;

use clactor::prelude::*;

const SIZE: usize = 4;

const SOURCE: &str = r#"
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

fn emulated_backend() -> CpuBackend {
    CpuBackend::builder()
        .device(CpuDeviceSpec::gpu("emulated GPU"))
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
        .build()
}

async fn square<B: ComputeBackend>(registry: &DeviceRegistry<B>) -> Result<Vec<i32>> {
    let device = registry.device(0)?;
    println!(
        "Device 0: {} ({}), {} compute units",
        device.name(),
        device.vendor(),
        device.max_compute_units()
    );

    let actor = spawn_from_source(
        registry,
        SOURCE,
        "matrix_square",
        SpawnConfig::new([SIZE, SIZE]),
        [Arg::input::<i32>(), Arg::output::<i32>()],
    )?;

    let matrix: Vec<i32> = (0..(SIZE * SIZE) as i32).collect();
    let reply = actor.ask((matrix,), Duration::from_secs(5)).await?;
    reply.get_cloned::<Vec<i32>>(0).ok_or(ComputeError::NoReply)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing(&clactor::config::LoggingConfig::default())?;

    println!("Available backends: {:?}", clactor::availability::available_backends());

    let squared = if clactor::availability::opencl() {
        square(&DeviceRegistry::with_defaults(OpenClBackend::new()?)).await?
    } else {
        square(&DeviceRegistry::with_defaults(emulated_backend())).await?
    };

    for row in squared.chunks(SIZE) {
        println!("{:?}", row);
    }
    Ok(())
}

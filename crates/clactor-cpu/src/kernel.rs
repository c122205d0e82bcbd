//! Host kernels and their execution.
//!
//! The emulated device runs kernels as registered host closures. A closure
//! receives a [`KernelInvocation`] with the launch geometry, the macros the
//! program was built with and typed views of the bound buffers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytemuck::Pod;
use thiserror::Error;
use tracing::warn;

use clactor_core::backend::{EventStatus, MemAccess};
use clactor_core::status::Status;

use crate::memory::CpuMemory;

/// Host implementation of a kernel.
pub type CpuKernelFn =
    Arc<dyn Fn(&mut KernelInvocation<'_>) -> Result<(), KernelFault> + Send + Sync>;

/// Error raised by a host kernel. The command fails with
/// [`Status::OUT_OF_RESOURCES`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelFault {
    /// No buffer is bound at this index.
    #[error("kernel has no argument {0}")]
    NoSuchArgument(usize),

    /// Access mode of the buffer forbids the operation.
    #[error("argument {index} is {access:?} and cannot be {operation}")]
    AccessDenied {
        /// Argument index.
        index: usize,
        /// Access mode of the bound buffer.
        access: MemAccess,
        /// "read" or "written".
        operation: &'static str,
    },

    /// Buffer size does not fit the requested element type.
    #[error("argument {index} holds {size} bytes, not a whole number of {element}")]
    BadLayout {
        /// Argument index.
        index: usize,
        /// Buffer size in bytes.
        size: usize,
        /// Requested element type.
        element: &'static str,
    },

    /// Kernel specific failure.
    #[error("{0}")]
    Failed(String),
}

struct ArgView {
    access: MemAccess,
    size: usize,
    words: Vec<u64>,
}

/// One execution of a host kernel.
pub struct KernelInvocation<'a> {
    kernel_name: &'a str,
    global: &'a [usize],
    offsets: &'a [usize],
    local: &'a [usize],
    defines: &'a HashMap<String, String>,
    args: Vec<ArgView>,
}

impl<'a> KernelInvocation<'a> {
    /// Name of the kernel.
    pub fn kernel_name(&self) -> &str {
        self.kernel_name
    }

    /// Number of dimensions.
    pub fn work_dim(&self) -> usize {
        self.global.len()
    }

    /// Global work size in `dim`; 1 past the last dimension.
    pub fn global_size(&self, dim: usize) -> usize {
        self.global.get(dim).copied().unwrap_or(1)
    }

    /// Global offset in `dim`.
    pub fn global_offset(&self, dim: usize) -> usize {
        self.offsets.get(dim).copied().unwrap_or(0)
    }

    /// Work-group size in `dim`. Defaults to 1 when the launch left it open.
    pub fn local_size(&self, dim: usize) -> usize {
        self.local.get(dim).copied().unwrap_or(1)
    }

    /// Number of work-groups in `dim`.
    pub fn num_groups(&self, dim: usize) -> usize {
        self.global_size(dim) / self.local_size(dim).max(1)
    }

    /// Total number of work-items.
    pub fn total_work_items(&self) -> usize {
        self.global.iter().product()
    }

    /// Global ids of all work-items, offsets applied, first dimension fastest.
    pub fn global_ids(&self) -> Vec<[usize; 3]> {
        let size = |d: usize| self.global_size(d);
        let mut ids = Vec::with_capacity(self.total_work_items());
        for z in 0..size(2) {
            for y in 0..size(1) {
                for x in 0..size(0) {
                    ids.push([
                        x + self.global_offset(0),
                        y + self.global_offset(1),
                        z + self.global_offset(2),
                    ]);
                }
            }
        }
        ids
    }

    /// Check if the program was built with macro `name`.
    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    /// Value of macro `name`; `"1"` when defined without a value.
    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    /// Number of bound arguments.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Copy of argument `index` as elements of `T`.
    pub fn read<T: Pod>(&self, index: usize) -> Result<Vec<T>, KernelFault> {
        let arg = self
            .args
            .get(index)
            .ok_or(KernelFault::NoSuchArgument(index))?;
        if !arg.access.kernel_readable() {
            return Err(KernelFault::AccessDenied {
                index,
                access: arg.access,
                operation: "read",
            });
        }
        let bytes = &bytemuck::cast_slice::<u64, u8>(&arg.words)[..arg.size];
        bytemuck::try_cast_slice::<u8, T>(bytes)
            .map(<[T]>::to_vec)
            .map_err(|_| KernelFault::BadLayout {
                index,
                size: arg.size,
                element: std::any::type_name::<T>(),
            })
    }

    /// Mutable view of argument `index` as elements of `T`.
    ///
    /// The view starts with the current buffer contents, so read-write
    /// arguments can be updated in place.
    pub fn write<T: Pod>(&mut self, index: usize) -> Result<&mut [T], KernelFault> {
        let arg = self
            .args
            .get_mut(index)
            .ok_or(KernelFault::NoSuchArgument(index))?;
        if !arg.access.kernel_writable() {
            return Err(KernelFault::AccessDenied {
                index,
                access: arg.access,
                operation: "written",
            });
        }
        let size = arg.size;
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut arg.words)[..size];
        bytemuck::try_cast_slice_mut::<u8, T>(bytes).map_err(|_| KernelFault::BadLayout {
            index,
            size,
            element: std::any::type_name::<T>(),
        })
    }
}

/// A kernel launch captured at enqueue time.
pub(crate) struct KernelLaunch {
    pub(crate) name: Arc<str>,
    pub(crate) func: CpuKernelFn,
    pub(crate) defines: Arc<HashMap<String, String>>,
    pub(crate) args: Vec<Arc<CpuMemory>>,
    pub(crate) global: Vec<usize>,
    pub(crate) offsets: Vec<usize>,
    pub(crate) local: Vec<usize>,
}

impl KernelLaunch {
    /// Run the kernel and write results back to device memory.
    pub(crate) fn run(self) -> EventStatus {
        let args = self
            .args
            .iter()
            .map(|memory| ArgView {
                access: memory.access(),
                size: memory.size(),
                words: memory.snapshot(),
            })
            .collect();

        let mut invocation = KernelInvocation {
            kernel_name: &self.name,
            global: &self.global,
            offsets: &self.offsets,
            local: &self.local,
            defines: &self.defines,
            args,
        };

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| (self.func)(&mut invocation)));

        match outcome {
            Ok(Ok(())) => {
                for (memory, view) in self.args.iter().zip(invocation.args) {
                    if view.access.kernel_writable() {
                        memory.store(view.words);
                    }
                }
                EventStatus::Complete
            }
            Ok(Err(fault)) => {
                warn!("Kernel '{}' failed: {}", self.name, fault);
                EventStatus::Failed(Status::OUT_OF_RESOURCES)
            }
            Err(_) => {
                warn!("Kernel '{}' panicked", self.name);
                EventStatus::Failed(Status::OUT_OF_RESOURCES)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CpuBuffer;

    fn launch(func: CpuKernelFn, buffers: &[&CpuBuffer], global: Vec<usize>) -> KernelLaunch {
        let mut defines = HashMap::new();
        defines.insert("SCALE".to_string(), "3".to_string());
        KernelLaunch {
            name: Arc::from("test"),
            func,
            defines: Arc::new(defines),
            args: buffers.iter().map(|b| Arc::clone(b.memory())).collect(),
            global,
            offsets: Vec::new(),
            local: Vec::new(),
        }
    }

    #[test]
    fn test_run_scales_in_place() {
        let buffer = CpuBuffer::new(16, MemAccess::ReadWrite);
        buffer
            .memory()
            .write(bytemuck::cast_slice(&[1i32, 2, 3, 4]))
            .unwrap();

        let func: CpuKernelFn = Arc::new(|inv| {
            let scale: i32 = inv.define("SCALE").and_then(|v| v.parse().ok()).unwrap_or(1);
            for x in inv.write::<i32>(0)? {
                *x *= scale;
            }
            Ok(())
        });

        assert_eq!(launch(func, &[&buffer], vec![4]).run(), EventStatus::Complete);
        let out: Vec<i32> = bytemuck::pod_collect_to_vec(&buffer.memory().read(16).unwrap());
        assert_eq!(out, vec![3, 6, 9, 12]);
    }

    #[test]
    fn test_access_rules() {
        let input = CpuBuffer::new(8, MemAccess::ReadOnly);
        let output = CpuBuffer::new(8, MemAccess::WriteOnly);

        let func: CpuKernelFn = Arc::new(|inv| {
            assert!(matches!(
                inv.write::<u32>(0),
                Err(KernelFault::AccessDenied { index: 0, .. })
            ));
            assert!(matches!(
                inv.read::<u32>(1),
                Err(KernelFault::AccessDenied { index: 1, .. })
            ));
            assert_eq!(inv.read::<u32>(2), Err(KernelFault::NoSuchArgument(2)));
            Ok(())
        });

        assert_eq!(
            launch(func, &[&input, &output], vec![2]).run(),
            EventStatus::Complete
        );
    }

    #[test]
    fn test_fault_fails_without_writeback() {
        let buffer = CpuBuffer::new(4, MemAccess::ReadWrite);
        let func: CpuKernelFn = Arc::new(|inv| {
            inv.write::<u32>(0)?[0] = 7;
            Err(KernelFault::Failed("boom".into()))
        });

        assert_eq!(
            launch(func, &[&buffer], vec![1]).run(),
            EventStatus::Failed(Status::OUT_OF_RESOURCES)
        );
        assert_eq!(buffer.memory().read(4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_geometry() {
        let func: CpuKernelFn = Arc::new(|inv| {
            assert_eq!(inv.work_dim(), 2);
            assert_eq!(inv.local_size(0), 1);
            assert_eq!(inv.num_groups(1), 3);
            let ids = inv.global_ids();
            assert_eq!(ids.len(), 6);
            assert_eq!(ids[1], [1, 0, 0]);
            assert_eq!(ids[5], [1, 2, 0]);
            Ok(())
        });
        assert_eq!(launch(func, &[], vec![2, 3]).run(), EventStatus::Complete);
    }
}

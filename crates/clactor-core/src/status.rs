//! Backend status codes.
//!
//! Every fallible call on a [`ComputeBackend`](crate::backend::ComputeBackend)
//! reports failure as a [`Status`]. The numeric values follow the OpenCL host
//! API so that the OpenCL binding can pass driver codes through unchanged and
//! the emulated CPU device reports the same codes a real driver would.

use std::fmt;

/// A backend status code. Zero is success, negative values are errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

macro_rules! status_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal;)*) => {
        impl Status {
            $(
                $(#[$doc])*
                pub const $name: Status = Status($value);
            )*

            /// Symbolic name of a known code.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(concat!("CL_", stringify!($name))),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    /// The call succeeded.
    SUCCESS = 0;
    /// No device of the requested type exists.
    DEVICE_NOT_FOUND = -1;
    /// The device exists but is not available.
    DEVICE_NOT_AVAILABLE = -2;
    /// No compiler is available for the device.
    COMPILER_NOT_AVAILABLE = -3;
    /// Allocating device memory failed.
    MEM_OBJECT_ALLOCATION_FAILURE = -4;
    /// The device ran out of resources.
    OUT_OF_RESOURCES = -5;
    /// The host ran out of memory.
    OUT_OF_HOST_MEMORY = -6;
    /// Profiling information is not available.
    PROFILING_INFO_NOT_AVAILABLE = -7;
    /// Program build failed.
    BUILD_PROGRAM_FAILURE = -11;
    /// An event in the wait list failed.
    EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14;
    /// Invalid argument value.
    INVALID_VALUE = -30;
    /// Invalid device type.
    INVALID_DEVICE_TYPE = -31;
    /// Invalid platform.
    INVALID_PLATFORM = -32;
    /// Invalid device.
    INVALID_DEVICE = -33;
    /// Invalid context.
    INVALID_CONTEXT = -34;
    /// Invalid queue properties.
    INVALID_QUEUE_PROPERTIES = -35;
    /// Invalid command queue.
    INVALID_COMMAND_QUEUE = -36;
    /// Invalid memory object.
    INVALID_MEM_OBJECT = -38;
    /// Invalid build options.
    INVALID_BUILD_OPTIONS = -43;
    /// Invalid program.
    INVALID_PROGRAM = -44;
    /// The program has no executable for the device.
    INVALID_PROGRAM_EXECUTABLE = -45;
    /// The kernel name is not defined in the program.
    INVALID_KERNEL_NAME = -46;
    /// Invalid kernel object.
    INVALID_KERNEL = -48;
    /// Argument index out of range.
    INVALID_ARG_INDEX = -49;
    /// Invalid argument value.
    INVALID_ARG_VALUE = -50;
    /// Invalid argument size.
    INVALID_ARG_SIZE = -51;
    /// Kernel arguments have not been set.
    INVALID_KERNEL_ARGS = -52;
    /// Invalid number of work dimensions.
    INVALID_WORK_DIMENSION = -53;
    /// Invalid work-group size.
    INVALID_WORK_GROUP_SIZE = -54;
    /// Invalid work-item size.
    INVALID_WORK_ITEM_SIZE = -55;
    /// Invalid global offset.
    INVALID_GLOBAL_OFFSET = -56;
    /// Invalid event wait list.
    INVALID_EVENT_WAIT_LIST = -57;
    /// Invalid event.
    INVALID_EVENT = -58;
    /// Operation not permitted.
    INVALID_OPERATION = -59;
    /// Invalid buffer size.
    INVALID_BUFFER_SIZE = -61;
    /// Invalid global work size.
    INVALID_GLOBAL_WORK_SIZE = -63;
}

impl Status {
    /// Check if this code signals success.
    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Convert to a `Result`, keeping the code as the error.
    pub fn ok(self) -> std::result::Result<(), Status> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "unknown status ({})", self.0),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

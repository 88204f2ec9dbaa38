use bitflags::bitflags;
use mm::VirtualAddress;

use crate::config::{KERNEL_DATA_SELECTOR, USER_DATA_SELECTOR};
use crate::error::KernelResult;
use crate::task::Registers;

#[macro_export]
macro_rules! interrupt_vectors {
    (
        $storage: ty,
        $(
            $name:ident = $value:expr,
        )*
    ) => {
        /// Represents an interrupt vector.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct InterruptVector($storage);

        impl InterruptVector {
            $(
                pub const $name: Self = Self($value);
            )*

            /// Creates a new interrupt vector from a raw value.
            pub const fn new(value: $storage) -> Self {
                Self(value)
            }

            /// Returns the raw value of the interrupt vector.
            pub const fn value(&self) -> $storage {
                self.0
            }

            /// Returns the name of the interrupt vector, if known.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $(
                        $value => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }

        impl core::fmt::Debug for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "InterruptVector::{}({})", name, self.0)
                } else {
                    write!(f, "InterruptVector({})", self.0)
                }
            }
        }

        impl core::fmt::Display for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }
    }
}

crate::interrupt_vectors! {
    u8,
    DIVIDE_ERROR = 0,
    DEBUG = 1,
    NON_MASKABLE_INTERRUPT = 2,
    BREAKPOINT = 3,
    OVERFLOW = 4,
    BOUND_RANGE_EXCEEDED = 5,
    INVALID_OPCODE = 6,
    DEVICE_NOT_AVAILABLE = 7,
    DOUBLE_FAULT = 8,
    COPROCESSOR_SEGMENT_OVERRUN = 9,
    INVALID_TSS = 10,
    SEGMENT_NOT_PRESENT = 11,
    STACK_SEGMENT_FAULT = 12,
    GENERAL_PROTECTION_FAULT = 13,
    PAGE_FAULT = 14,
    X87_FLOATING_POINT_EXCEPTION = 16,
    ALIGNMENT_CHECK = 17,
    MACHINE_CHECK = 18,
    SIMD_FLOATING_POINT_EXCEPTION = 19,
    TIMER = 32,
    YIELD = 0x81,
}

impl InterruptVector {
    /// Vectors 0-31 are processor exceptions.
    pub const fn is_exception(&self) -> bool {
        self.0 < 32
    }
}

bitflags! {
    /// Error code pushed by the processor for a page fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultErrorCode: u32 {
        /// The page was present; the fault is a protection violation.
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
        const RESERVED_WRITE = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// Register state saved by the interrupt entry stubs, lowest address first.
///
/// The general-purpose block is the `pusha` image, followed by the vector and
/// error code pushed by the stub, followed by what the processor pushed. `esp`
/// and `ss` are only pushed when the interrupt crossed from ring 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct InterruptFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Stack pointer as seen by `pusha`, pointing at `vector`.
    pub kesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl InterruptFrame {
    /// Bytes between `kesp` and the interrupted stack pointer for a same-ring interrupt.
    const SAME_RING_TAIL: u32 = 5 * 4;

    /// Returns true if the interrupted code ran in ring 3.
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Captures the interrupted context as a register snapshot.
    pub fn registers(&self) -> Registers {
        let (esp, ss, data) = if self.from_user() {
            (self.esp, self.ss, u32::from(USER_DATA_SELECTOR))
        } else {
            let kernel_data = u32::from(KERNEL_DATA_SELECTOR);
            (self.kesp + Self::SAME_RING_TAIL, kernel_data, kernel_data)
        };

        Registers {
            eax: self.eax,
            ebx: self.ebx,
            ecx: self.ecx,
            edx: self.edx,
            esi: self.esi,
            edi: self.edi,
            ebp: self.ebp,
            eip: self.eip,
            esp,
            eflags: self.eflags,
            cs: self.cs,
            ds: data,
            es: data,
            fs: data,
            gs: data,
            ss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Standard,
    PageFault {
        faulting_address: VirtualAddress,
        error: PageFaultErrorCode,
    },
}

/// Everything the kernel is told about one interrupt.
#[derive(Debug, Clone, Copy)]
pub struct InterruptContext {
    vector: InterruptVector,
    frame: InterruptFrame,
    kind: InterruptKind,
}

impl InterruptContext {
    pub fn new(vector: InterruptVector, frame: InterruptFrame, kind: InterruptKind) -> Self {
        Self {
            vector,
            frame,
            kind,
        }
    }

    /// Builds the context for a page fault, decoding the error code from the frame.
    pub fn page_fault(frame: InterruptFrame, faulting_address: VirtualAddress) -> Self {
        let error = PageFaultErrorCode::from_bits_truncate(frame.error_code);
        Self::new(
            InterruptVector::PAGE_FAULT,
            frame,
            InterruptKind::PageFault {
                faulting_address,
                error,
            },
        )
    }

    pub fn vector(&self) -> InterruptVector {
        self.vector
    }

    pub fn frame(&self) -> &InterruptFrame {
        &self.frame
    }

    /// Returns the instruction pointer at the time of the interrupt.
    pub fn instruction_pointer(&self) -> VirtualAddress {
        VirtualAddress::new(self.frame.eip)
    }

    /// Returns the kind of interrupt.
    pub fn kind(&self) -> &InterruptKind {
        &self.kind
    }
}

/// The collaborator that delivers interrupts to the kernel.
pub trait InterruptRegistry {
    /// Starts routing `vector` to [`Kernel::handle_interrupt`](crate::Kernel::handle_interrupt).
    fn register(&mut self, vector: InterruptVector) -> KernelResult<()>;
}

//! Compile-time limits and the runtime kernel configuration.

/// Exclusive upper bound on process ids; pids are issued from `1..PROC_MAX`.
pub const PROC_MAX: usize = 64;
pub const PROC_ARG_MAX: usize = 32;
pub const PROC_ENV_MAX: usize = 32;
pub const PROC_NAME_MAX: usize = 32;
pub const PATH_MAX: usize = 256;

pub const PROC_STACK_SIZE: usize = 16 * 1024;
pub const PROC_KERNEL_STACK_SIZE: usize = 8 * 1024;

/// Initial user stack pointer: one guard page below the kernel split.
pub const PROC_USER_STACK_VIRTUAL_TOP: u32 = 0xBFFF_F000;

/// Timer interrupts per second.
pub const TIMER_FREQUENCY: u32 = 100;

/// Bytes of an image handed to the binary-format loaders for sniffing.
pub const BINPRM_BUF_SIZE: usize = 256;

/// Maximum chain of `#!` interpreters followed by one exec.
pub const SCRIPT_MAX_DEPTH: usize = 4;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;

/// Interrupts enabled, reserved bit 1 set.
pub const INITIAL_EFLAGS: u32 = 0x202;

/// Where all of physical memory is visible to the kernel.
pub const KERNEL_DIRECT_MAP_OFFSET: u32 = mm::KERNEL_SPLIT;

/// Bytes of physical memory mapped at [`KERNEL_DIRECT_MAP_OFFSET`].
pub const KERNEL_DIRECT_MAP_SIZE: usize = 16 * 1024 * 1024;

/// Tunables of one kernel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub max_processes: usize,
    pub max_args: usize,
    pub max_envs: usize,
    pub max_name: usize,
    pub user_stack_size: usize,
    pub kernel_stack_size: usize,
    pub user_stack_top: u32,
    /// Kernel-mode entry point of the idle task.
    pub idle_entry: u32,
    pub direct_map_offset: u32,
    pub direct_map_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: PROC_MAX,
            max_args: PROC_ARG_MAX,
            max_envs: PROC_ENV_MAX,
            max_name: PROC_NAME_MAX,
            user_stack_size: PROC_STACK_SIZE,
            kernel_stack_size: PROC_KERNEL_STACK_SIZE,
            user_stack_top: PROC_USER_STACK_VIRTUAL_TOP,
            idle_entry: 0,
            direct_map_offset: KERNEL_DIRECT_MAP_OFFSET,
            direct_map_size: KERNEL_DIRECT_MAP_SIZE,
        }
    }
}

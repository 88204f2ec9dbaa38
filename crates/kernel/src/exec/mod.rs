//! Replacing a task's program.
//!
//! Exec builds the complete new image off to the side: a fresh address space
//! sharing the kernel half, the loaded program, new stacks and the argument
//! stack. Only when every step has succeeded is the image swapped into the
//! process and task. A failed exec leaves both exactly as they were.

mod binfmt;
mod binfmt_elf;
mod binfmt_script;
mod stack;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use mm::{AddressSpace, KernelHeap, VirtualAddress};

pub use binfmt::{BinaryFormat, BinaryRequest, LoadOutcome, LoadTarget, formats};
pub use binfmt_elf::ElfFormat;
pub use binfmt_script::ScriptFormat;
pub use stack::{ArgumentStack, build_argument_stack};

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::{
    Pid, alloc_kernel_stack, map_user_stack, to_owned_strings, user_registers, validate_path,
};
use crate::sched::Dispatch;
use crate::task::{Stack, TaskHandle, UserStack};
use crate::vfs;

/// A fully built program image waiting to be swapped in.
struct PreparedImage {
    entry: VirtualAddress,
    stack_pointer: VirtualAddress,
    argv: Vec<String>,
    kernel_stack: Stack,
    user_stack: UserStack,
}

impl<H: KernelHeap> Kernel<H> {
    /// Replaces the program of `task` with the one at `path`.
    ///
    /// The task must be the only task of its process. On success its address
    /// space, stacks and registers are new and it resumes at the program's
    /// entry point with `argv` and `envp` on its stack.
    pub fn kernel_exec(
        &mut self,
        task: TaskHandle,
        path: &str,
        argv: &[&str],
        envp: &[&str],
    ) -> KernelResult<()> {
        let pid = self
            .tasks
            .get(task)?
            .process()
            .ok_or(KernelError::InvalidArgument)?;
        if self.processes.get(pid)?.task_count() > 1 {
            return Err(KernelError::NotSupported);
        }
        if argv.len() > self.config.max_args || envp.len() > self.config.max_envs {
            return Err(KernelError::OutOfBounds);
        }
        validate_path(path)?;

        let envp = to_owned_strings(envp);
        let mut space = AddressSpace::with_kernel(&mut self.heap, &self.kernel_space)?;
        match self.prepare(&mut space, path, to_owned_strings(argv), &envp) {
            Ok(image) => {
                self.commit(task, pid, space, image, envp);
                log::info!("process {pid} now runs {path}");
                Ok(())
            }
            Err(error) => {
                space.destroy(&mut self.heap);
                log::info!("exec of {path} in process {pid} failed: {error}");
                Err(error)
            }
        }
    }

    /// Execs on behalf of the running task, which resumes in the new program.
    pub fn exec_current(
        &mut self,
        path: &str,
        argv: &[&str],
        envp: &[&str],
    ) -> KernelResult<Dispatch> {
        let current = self.scheduler.current();
        if current == self.scheduler.idle() {
            return Err(KernelError::InvalidArgument);
        }
        self.kernel_exec(current, path, argv, envp)?;
        Ok(Dispatch::Resume(current))
    }

    /// Builds the whole new image inside `space`, freeing what it allocated
    /// on failure. The caller owns `space` either way.
    fn prepare(
        &mut self,
        space: &mut AddressSpace,
        path: &str,
        argv: Vec<String>,
        envp: &[String],
    ) -> KernelResult<PreparedImage> {
        let (entry, argv) = self.load_binary(space, path, argv)?;

        let kernel_stack = alloc_kernel_stack(&mut self.heap, &self.config)?;
        let user_stack = match map_user_stack(&mut self.heap, &self.config, space) {
            Ok(stack) => stack,
            Err(error) => {
                self.heap.free(kernel_stack.base());
                return Err(error);
            }
        };

        let stacked = build_argument_stack(
            user_stack.top(),
            user_stack.memory().size(),
            &argv,
            envp,
        )
        .and_then(|stack| {
            space.write_user(&mut self.heap, stack.esp, &stack.image)?;
            Ok(stack.esp)
        });
        match stacked {
            Ok(stack_pointer) => Ok(PreparedImage {
                entry,
                stack_pointer,
                argv,
                kernel_stack,
                user_stack,
            }),
            Err(error) => {
                self.heap.free(kernel_stack.base());
                self.heap.free(user_stack.memory().base());
                Err(error)
            }
        }
    }

    /// Reads `path` and offers it to each binary format in turn, following
    /// interpreters until a program is loaded into `space`.
    ///
    /// Returns the entry point and the argument vector the program will see.
    fn load_binary(
        &mut self,
        space: &mut AddressSpace,
        path: &str,
        argv: Vec<String>,
    ) -> KernelResult<(VirtualAddress, Vec<String>)> {
        let mut path = path.to_string();
        let mut argv = argv;
        let mut depth = 0;
        loop {
            let image = vfs::read_all(self.fs.as_mut(), &path)?;
            let request = BinaryRequest {
                path: &path,
                image: &image,
                argv: &argv,
                depth,
            };
            let mut target = LoadTarget {
                heap: &mut self.heap,
                space: &mut *space,
            };

            match try_formats(&request, &mut target)? {
                LoadOutcome::Loaded { entry } => return Ok((entry, argv)),
                LoadOutcome::Interpreter {
                    path: interpreter,
                    argv: interpreter_argv,
                } => {
                    if interpreter_argv.len() > self.config.max_args {
                        return Err(KernelError::OutOfBounds);
                    }
                    validate_path(&interpreter)?;
                    path = interpreter;
                    argv = interpreter_argv;
                    depth += 1;
                }
                LoadOutcome::NotThisFormat => return Err(KernelError::InvalidFormat),
            }
        }
    }

    /// Swaps a prepared image into the process and task, then releases the
    /// old one.
    fn commit(
        &mut self,
        handle: TaskHandle,
        pid: Pid,
        space: AddressSpace,
        image: PreparedImage,
        envp: Vec<String>,
    ) {
        let Ok(process) = self.processes.get_mut(pid) else {
            panic!("process {pid} vanished during exec");
        };
        let old_space = core::mem::replace(&mut process.space, space);
        process.set_arguments(image.argv, envp);

        let Ok(task) = self.tasks.get_mut(handle) else {
            panic!("task {handle:?} vanished during exec");
        };
        let (old_kernel_stack, old_user_stack) =
            task.replace_stacks(Some(image.kernel_stack), Some(image.user_stack));
        *task.registers_mut() = user_registers(image.entry, image.stack_pointer);

        let running = handle == self.scheduler.current();
        if running {
            self.activate(handle);
        }
        old_space.destroy(&mut self.heap);
        if let Some(stack) = old_user_stack {
            self.heap.free(stack.memory().base());
        }
        // The running task is still executing on its old kernel stack.
        if let Some(stack) = old_kernel_stack {
            if running {
                self.retired_stacks.push(stack);
            } else {
                self.heap.free(stack.base());
            }
        }
    }
}

/// Offers `request` to every registered format until one accepts it.
fn try_formats(
    request: &BinaryRequest<'_>,
    target: &mut LoadTarget<'_>,
) -> KernelResult<LoadOutcome> {
    for format in formats() {
        match format.load(request, target)? {
            LoadOutcome::NotThisFormat => continue,
            outcome => {
                log::trace!("{} accepted by the {} loader", request.path, format.name());
                return Ok(outcome);
            }
        }
    }
    Err(KernelError::InvalidFormat)
}

//! The initial user stack of a new program.
//!
//! From the stack top downward: the argument strings, then the environment
//! strings, padding down to 16 bytes, then (from the final stack pointer
//! upward) `argc`, the `argv` pointers and a null, the `envp` pointers and a
//! null.

use alloc::vec;
use alloc::vec::Vec;
use core::iter;

use mm::VirtualAddress;

use crate::error::{KernelError, KernelResult};

const WORD: usize = core::mem::size_of::<u32>();
const STACK_ALIGN: usize = 16;

/// A ready-to-copy image of the top of a user stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentStack {
    /// Initial stack pointer; `image` is copied here.
    pub esp: VirtualAddress,
    pub image: Vec<u8>,
}

/// Lays out `argv` and `envp` below `top` in a stack of `size` bytes.
///
/// Fails with [`KernelError::OutOfBounds`] if the layout does not fit.
pub fn build_argument_stack<S: AsRef<str>, E: AsRef<str>>(
    top: VirtualAddress,
    size: usize,
    argv: &[S],
    envp: &[E],
) -> KernelResult<ArgumentStack> {
    let strings: Vec<&str> = argv
        .iter()
        .map(|arg| arg.as_ref())
        .chain(envp.iter().map(|env| env.as_ref()))
        .collect();

    // Distance of each string's first byte below `top`.
    let offsets: Vec<usize> = strings
        .iter()
        .scan(0usize, |below_top, string| {
            *below_top += string.len() + 1;
            Some(*below_top)
        })
        .collect();
    let strings_size = offsets.last().copied().unwrap_or(0);

    let words = 1 + argv.len() + 1 + envp.len() + 1;
    let esp = top
        .checked_sub(strings_size)
        .map(|bottom| bottom.align_down(STACK_ALIGN))
        .and_then(|bottom| bottom.checked_sub(words * WORD))
        .map(|esp| esp.align_down(STACK_ALIGN))
        .ok_or(KernelError::OutOfBounds)?;
    let used = top - esp;
    if used > size {
        return Err(KernelError::OutOfBounds);
    }

    let pointers: Vec<u32> = offsets
        .iter()
        .map(|&offset| (top - offset).as_u32())
        .collect();
    let (argv_pointers, envp_pointers) = pointers.split_at(argv.len());
    let table = iter::once(argv.len() as u32)
        .chain(argv_pointers.iter().copied())
        .chain(iter::once(0))
        .chain(envp_pointers.iter().copied())
        .chain(iter::once(0));

    let mut image = vec![0u8; used];
    for (index, word) in table.enumerate() {
        let at = index * WORD;
        image[at..at + WORD].copy_from_slice(&word.to_le_bytes());
    }
    for (string, &offset) in strings.iter().zip(&offsets) {
        let at = used - offset;
        image[at..at + string.len()].copy_from_slice(string.as_bytes());
    }

    Ok(ArgumentStack { esp, image })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(stack: &ArgumentStack, index: usize) -> u32 {
        let at = index * WORD;
        u32::from_le_bytes(stack.image[at..at + WORD].try_into().unwrap())
    }

    fn string_at(stack: &ArgumentStack, address: u32) -> &str {
        let at = (address - stack.esp.as_u32()) as usize;
        let len = stack.image[at..].iter().position(|&b| b == 0).unwrap();
        core::str::from_utf8(&stack.image[at..at + len]).unwrap()
    }

    #[test]
    fn argc_argv_envp_layout() {
        let top = VirtualAddress::new(0xBFFF_F000);
        let stack =
            build_argument_stack(top, 0x4000, &["/bin/sh", "-c", "ls"], &["PATH=/bin"]).unwrap();

        assert!(stack.esp.is_aligned(STACK_ALIGN));
        assert_eq!(stack.esp + stack.image.len(), top);
        assert_eq!(word(&stack, 0), 3);
        assert_eq!(string_at(&stack, word(&stack, 1)), "/bin/sh");
        assert_eq!(string_at(&stack, word(&stack, 2)), "-c");
        assert_eq!(string_at(&stack, word(&stack, 3)), "ls");
        assert_eq!(word(&stack, 4), 0);
        assert_eq!(string_at(&stack, word(&stack, 5)), "PATH=/bin");
        assert_eq!(word(&stack, 6), 0);

        // The first argument sits highest, right below the top.
        assert_eq!(word(&stack, 1), 0xBFFF_F000 - 8);
    }

    #[test]
    fn empty_vectors_still_terminate() {
        let top = VirtualAddress::new(0xBFFF_F000);
        let stack = build_argument_stack::<&str, &str>(top, 0x4000, &[], &[]).unwrap();

        assert_eq!(stack.esp, VirtualAddress::new(0xBFFF_EFF0));
        assert_eq!(word(&stack, 0), 0);
        assert_eq!(word(&stack, 1), 0);
        assert_eq!(word(&stack, 2), 0);
    }

    #[test]
    fn too_large_for_stack() {
        let top = VirtualAddress::new(0xBFFF_F000);
        let big = "x".repeat(0x1000);
        assert_eq!(
            build_argument_stack(top, 0x1000, &[big.as_str()], &[] as &[&str]),
            Err(KernelError::OutOfBounds)
        );
    }
}

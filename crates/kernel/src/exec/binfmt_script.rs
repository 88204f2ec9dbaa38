//! `#!` interpreter scripts.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::binfmt::{BinaryFormat, BinaryRequest, LoadOutcome, LoadTarget};
use crate::config::SCRIPT_MAX_DEPTH;
use crate::error::{KernelError, KernelResult};

pub struct ScriptFormat;

impl BinaryFormat for ScriptFormat {
    fn name(&self) -> &'static str {
        "script"
    }

    fn load(
        &self,
        request: &BinaryRequest<'_>,
        _target: &mut LoadTarget<'_>,
    ) -> KernelResult<LoadOutcome> {
        let header = request.header();
        let Some(line) = header.strip_prefix(b"#!") else {
            return Ok(LoadOutcome::NotThisFormat);
        };
        if request.depth >= SCRIPT_MAX_DEPTH {
            return Err(KernelError::OutOfBounds);
        }

        let line = match line.iter().position(|&byte| byte == b'\n') {
            Some(end) => &line[..end],
            None if header.len() == request.image.len() => line,
            None => return Err(KernelError::InvalidFormat),
        };
        let line = core::str::from_utf8(line).map_err(|_| KernelError::InvalidFormat)?;
        let (interpreter, argument) = parse_interpreter(line)?;

        let mut argv = Vec::with_capacity(request.argv.len() + 2);
        argv.push(interpreter.to_string());
        argv.extend(argument.map(ToString::to_string));
        argv.push(request.path.to_string());
        argv.extend(request.argv.iter().skip(1).cloned());

        log::debug!("{}: interpreted by {interpreter}", request.path);
        Ok(LoadOutcome::Interpreter {
            path: interpreter.to_string(),
            argv,
        })
    }
}

/// Splits `interpreter [argument]`; everything after the interpreter is a
/// single argument.
fn parse_interpreter(line: &str) -> KernelResult<(&str, Option<&str>)> {
    let line = line.trim_matches([' ', '\t', '\r']);
    let (interpreter, rest) = match line.find([' ', '\t']) {
        Some(split) => (&line[..split], Some(line[split..].trim_matches([' ', '\t']))),
        None => (line, None),
    };
    if interpreter.is_empty() {
        return Err(KernelError::InvalidFormat);
    }
    Ok((interpreter, rest.filter(|rest| !rest.is_empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use mm::{AddressSpace, EmulatedMemory};

    fn load_with(image: &[u8], argv: &[&str], depth: usize) -> KernelResult<LoadOutcome> {
        let mut mem = EmulatedMemory::new(64 * 1024);
        let mut space = AddressSpace::new(&mut mem).unwrap();
        let argv: Vec<String> = argv.iter().map(|arg| arg.to_string()).collect();
        let request = BinaryRequest {
            path: "/scripts/run",
            image,
            argv: &argv,
            depth,
        };
        let outcome = ScriptFormat.load(
            &request,
            &mut LoadTarget {
                heap: &mut mem,
                space: &mut space,
            },
        );
        assert_eq!(space.regions().len(), 0);
        space.destroy(&mut mem);
        outcome
    }

    fn interpreter(path: &str, argv: &[&str]) -> KernelResult<LoadOutcome> {
        Ok(LoadOutcome::Interpreter {
            path: path.to_string(),
            argv: argv.iter().map(|arg| arg.to_string()).collect(),
        })
    }

    #[test]
    fn rewrites_argv() {
        assert_eq!(
            load_with(b"#!/bin/sh\necho hi\n", &["run", "a", "b"], 0),
            interpreter("/bin/sh", &["/bin/sh", "/scripts/run", "a", "b"])
        );
    }

    #[test]
    fn keeps_single_interpreter_argument() {
        assert_eq!(
            load_with(b"#! /usr/bin/env  python -u \n", &["run"], 0),
            interpreter("/usr/bin/env", &["/usr/bin/env", "python -u", "/scripts/run"])
        );
    }

    #[test]
    fn script_without_trailing_newline() {
        assert_eq!(
            load_with(b"#!/bin/true", &[], 0),
            interpreter("/bin/true", &["/bin/true", "/scripts/run"])
        );
    }

    #[test]
    fn rejections() {
        assert_eq!(
            load_with(b"\x7fELF", &[], 0),
            Ok(LoadOutcome::NotThisFormat)
        );
        assert_eq!(load_with(b"#!  \n", &[], 0), Err(KernelError::InvalidFormat));

        let mut long = b"#!/bin/".to_vec();
        long.extend(vec![b'x'; 300]);
        long.push(b'\n');
        assert_eq!(load_with(&long, &[], 0), Err(KernelError::InvalidFormat));

        assert_eq!(
            load_with(b"#!/bin/sh\n", &[], SCRIPT_MAX_DEPTH),
            Err(KernelError::OutOfBounds)
        );
    }
}

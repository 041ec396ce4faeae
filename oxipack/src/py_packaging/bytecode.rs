// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::resource::BytecodeOptimizationLevel,
    anyhow::{anyhow, Context, Result},
    once_cell::sync::Lazy,
    std::{
        io::{BufRead, BufReader, Read, Write},
        path::Path,
        process,
    },
};

pub const BYTECODE_COMPILER: &[u8] = include_bytes!("bytecodecompiler.py");

static RE_CODING: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r"^[ \t\f]*#.*?coding[:=][ \t]*([-_.a-zA-Z0-9]+)")
        .expect("coding regex is valid")
});

/// Derive the source encoding from Python source code.
pub fn python_source_encoding(source: &[u8]) -> Vec<u8> {
    // Default source encoding is UTF-8. But per PEP 263, the first or second
    // line of source can match a regular expression to define a custom
    // encoding.
    let lines = source.split(|v| v == &b'\n');

    for line in lines.take(2) {
        if let Some(m) = RE_CODING.captures(line).and_then(|caps| caps.get(1)) {
            return m.as_bytes().to_vec();
        }
    }

    b"utf-8".to_vec()
}

/// Whether `__file__` occurs in Python source code.
pub fn has_dunder_file(source: &[u8]) -> bool {
    // Sources may be in encodings like UTF-16, so searching the raw bytes
    // for b"__file__" is not sufficient.
    let encoding = python_source_encoding(source);

    let encoder = encoding_rs::Encoding::for_label(&encoding).unwrap_or(encoding_rs::UTF_8);

    let (source, ..) = encoder.decode(source);

    source.contains("__file__")
}

/// Output mode for bytecode compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompileMode {
    /// Emit just Python bytecode.
    Bytecode,
    /// Emit .pyc header with no hash verification.
    PycUncheckedHash,
}

impl CompileMode {
    fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Bytecode => b"bytecode",
            Self::PycUncheckedHash => b"pyc-unchecked-hash",
        }
    }
}

/// Something that turns Python source into bytecode.
pub trait PythonBytecodeCompiler {
    /// Compile Python source into bytecode with an optimization level.
    fn compile(
        &mut self,
        source: &[u8],
        filename: &str,
        optimize: BytecodeOptimizationLevel,
        output_mode: CompileMode,
    ) -> Result<Vec<u8>>;
}

/// Compiles bytecode using a long-running Python interpreter process.
#[derive(Debug)]
pub struct BytecodeCompiler {
    _temp_dir: tempfile::TempDir,
    command: process::Child,
}

impl BytecodeCompiler {
    /// Spawn a compiler process using the given `python` executable.
    pub fn new(python: &Path) -> Result<BytecodeCompiler> {
        let temp_dir = tempfile::Builder::new()
            .prefix("bytecode-compiler")
            .tempdir()?;

        let script_path = temp_dir.path().join("bytecodecompiler.py");
        std::fs::write(&script_path, BYTECODE_COMPILER)?;

        let command = process::Command::new(python)
            .arg(&script_path)
            .stdin(process::Stdio::piped())
            .stdout(process::Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning bytecode compiler with {}", python.display()))?;

        Ok(BytecodeCompiler {
            _temp_dir: temp_dir,
            command,
        })
    }
}

impl PythonBytecodeCompiler for BytecodeCompiler {
    fn compile(
        &mut self,
        source: &[u8],
        filename: &str,
        optimize: BytecodeOptimizationLevel,
        output_mode: CompileMode,
    ) -> Result<Vec<u8>> {
        let stdin = self
            .command
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("bytecode compiler has no stdin"))?;

        stdin.write_all(b"compile\n")?;
        stdin.write_all(filename.len().to_string().as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.write_all(source.len().to_string().as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.write_all(i32::from(optimize).to_string().as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.write_all(output_mode.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.write_all(filename.as_bytes())?;
        stdin.write_all(source)?;
        stdin.flush()?;

        let stdout = self
            .command
            .stdout
            .as_mut()
            .ok_or_else(|| anyhow!("bytecode compiler has no stdout"))?;

        let mut reader = BufReader::new(stdout);

        let mut len_s = String::new();
        reader.read_line(&mut len_s)?;

        let bytecode_len = len_s
            .trim_end()
            .parse::<u64>()
            .with_context(|| format!("compiling {}: bytecode compiler did not return a length", filename))?;

        let mut bytecode: Vec<u8> = Vec::new();
        reader.take(bytecode_len).read_to_end(&mut bytecode)?;

        Ok(bytecode)
    }
}

impl Drop for BytecodeCompiler {
    fn drop(&mut self) {
        if let Some(stdin) = self.command.stdin.as_mut() {
            let _ = stdin.write_all(b"exit\n");
            let _ = stdin.flush();
        }

        let _ = self.command.wait();
    }
}

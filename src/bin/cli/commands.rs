//! Command implementations for the CLI tool.

use std::io::{self, Write};
use std::path::Path;

use packfs::{Error, Vfs, VirtualPath};

use crate::OutputFormat;
use crate::exit_codes::{ExitCode, error_to_exit_code};
use crate::output::{ExtractSummary, Listed, create_formatter};

fn report(context: &str, error: &Error) -> ExitCode {
    eprintln!("Error: {}: {}", context, error);
    error_to_exit_code(error)
}

/// Splits `PATH@MOUNT_POINT`; a missing mount point means the root.
fn parse_mount(spec: &str) -> (&str, &str) {
    match spec.rsplit_once('@') {
        Some((source, point)) if !source.is_empty() => (source, point),
        _ => (spec, ""),
    }
}

/// Builds the filesystem from the `--mount` arguments, in precedence order.
pub fn build_vfs(mounts: &[String], allow_symlinks: bool) -> Result<Vfs, ExitCode> {
    let vfs = Vfs::new();
    vfs.set_allow_symlinks(allow_symlinks);
    for spec in mounts {
        let (source, mount_point) = parse_mount(spec);
        if let Err(e) = vfs.mount(source, mount_point, true) {
            return Err(report(source, &e));
        }
    }
    Ok(vfs)
}

/// Ls command implementation
pub fn ls(vfs: &Vfs, dir: &str, recursive: bool, format: OutputFormat) -> ExitCode {
    let formatter = create_formatter(format);
    let dir = match VirtualPath::new(dir) {
        Ok(d) => d,
        Err(e) => return report(dir, &e),
    };
    let mut entries = Vec::new();
    if let Err(e) = collect(vfs, &dir, recursive, &mut entries) {
        return report(dir.as_str(), &e);
    }
    print!("{}", formatter.format_list(&entries));
    ExitCode::Success
}

fn collect(vfs: &Vfs, dir: &VirtualPath, recursive: bool, out: &mut Vec<Listed>) -> packfs::Result<()> {
    for name in vfs.list(dir.as_str())? {
        let path = dir.join(&name)?;
        let metadata = match vfs.stat(path.as_str()) {
            Ok(meta) => meta,
            Err(e) => {
                eprintln!("Warning: {}: {}", path, e);
                continue;
            }
        };
        let descend = recursive && metadata.is_dir();
        out.push(Listed {
            path: path.as_str().to_string(),
            metadata,
        });
        if descend {
            collect(vfs, &path, true, out)?;
        }
    }
    Ok(())
}

/// Stat command implementation
pub fn stat(vfs: &Vfs, path: &str, format: OutputFormat) -> ExitCode {
    let formatter = create_formatter(format);
    match vfs.resolve(path) {
        Ok(entry) => {
            print!("{}", formatter.format_stat(&entry));
            if format == OutputFormat::Json {
                println!();
            }
            ExitCode::Success
        }
        Err(e) => report(path, &e),
    }
}

/// Cat command implementation
pub fn cat(vfs: &Vfs, path: &str) -> ExitCode {
    let mut file = match vfs.open_read(path) {
        Ok(f) => f,
        Err(e) => return report(path, &e),
    };
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    match io::copy(&mut file, &mut lock).and_then(|_| lock.flush()) {
        Ok(()) => ExitCode::Success,
        Err(e) => report(path, &Error::from(e)),
    }
}

/// Extract command implementation
pub fn extract(vfs: &Vfs, path: &str, output: &Path, format: OutputFormat) -> ExitCode {
    let formatter = create_formatter(format);
    let root = match VirtualPath::new(path) {
        Ok(p) => p,
        Err(e) => return report(path, &e),
    };
    let mut summary = ExtractSummary::default();
    if let Err(e) = extract_tree(vfs, &root, output, &mut summary) {
        return report(root.as_str(), &e);
    }
    print!("{}", formatter.format_extract_result(&summary));
    if summary.failures.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::Warning
    }
}

fn extract_tree(
    vfs: &Vfs,
    path: &VirtualPath,
    output: &Path,
    summary: &mut ExtractSummary,
) -> packfs::Result<()> {
    let meta = vfs.stat(path.as_str())?;
    let target = path.to_native(output);
    if meta.is_dir() {
        std::fs::create_dir_all(&target)?;
        for name in vfs.list(path.as_str())? {
            extract_tree(vfs, &path.join(&name)?, output, summary)?;
        }
        return Ok(());
    }
    match extract_file(vfs, path, &target) {
        Ok(bytes) => {
            summary.files_extracted += 1;
            summary.bytes_extracted += bytes;
        }
        Err(e) => summary.failures.push((path.as_str().to_string(), e.to_string())),
    }
    Ok(())
}

fn extract_file(vfs: &Vfs, path: &VirtualPath, target: &Path) -> packfs::Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = vfs.open_read(path.as_str())?;
    let mut out = std::fs::File::create(target)?;
    let bytes = io::copy(&mut file, &mut out)?;
    file.close()?;
    Ok(bytes)
}

/// Formats command implementation
pub fn formats(vfs: &Vfs, format: OutputFormat) -> ExitCode {
    let formatter = create_formatter(format);
    print!("{}", formatter.format_formats(&vfs.supported_formats()));
    ExitCode::Success
}

use anyhow::{bail, Context, Result};
use clap::Parser;
use filesync::envelope::{generate_key_pair, DEFAULT_KEY_BITS};
use std::path::PathBuf;

/// Generate the RSA key pair shared by filesyncd (private) and filesync (public).
#[derive(Parser, Debug)]
#[command(name = "filesync-keygen", version, about)]
struct Cli {
    /// Directory to write private_key.pem and public_key.pem into
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Modulus size in bits
    #[arg(short, long, default_value_t = DEFAULT_KEY_BITS)]
    bits: usize,

    /// Overwrite existing key files
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let private_path = cli.out_dir.join("private_key.pem");
    let public_path = cli.out_dir.join("public_key.pem");
    if !cli.force && (private_path.exists() || public_path.exists()) {
        bail!(
            "Key files already exist in {} (use --force to overwrite)",
            cli.out_dir.display()
        );
    }

    let (private_pem, public_pem) = generate_key_pair(cli.bits)?;

    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("Failed to create {}", cli.out_dir.display()))?;
    write_private(&private_path, &private_pem)?;
    std::fs::write(&public_path, public_pem)
        .with_context(|| format!("Failed to write {}", public_path.display()))?;

    println!("Wrote {}", private_path.display());
    println!("Wrote {}", public_path.display());
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &std::path::Path, pem: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.write_all(pem.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &std::path::Path, pem: &str) -> Result<()> {
    std::fs::write(path, pem).with_context(|| format!("Failed to write {}", path.display()))
}

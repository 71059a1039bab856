//! Self-signed TLS material for the optional HTTPS listener, generated on
//! first run under the agent's config dir and reused afterwards.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::info;

fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostwatch_agent")
        .join("tls")
}

pub fn cert_paths() -> (PathBuf, PathBuf) {
    let dir = config_dir();
    (dir.join("cert.pem"), dir.join("key.pem"))
}

pub fn ensure_self_signed_cert() -> anyhow::Result<(PathBuf, PathBuf)> {
    let (cert_path, key_path) = cert_paths();
    if cert_path.exists() && key_path.exists() && key_file_is_valid(&key_path) {
        return Ok((cert_path, key_path));
    }
    if let Some(parent) = cert_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let names = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];
    let generated = rcgen::generate_simple_self_signed(names)?;
    fs::write(&cert_path, generated.cert.pem())?;
    fs::write(&key_path, generated.key_pair.serialize_pem())?;

    info!(cert = %cert_path.display(), "generated self-signed TLS certificate");
    Ok((cert_path, key_path))
}

// A half-written or corrupted key would take the listener down at startup;
// regenerate instead.
fn key_file_is_valid(path: &Path) -> bool {
    fs::File::open(path)
        .ok()
        .map(BufReader::new)
        .and_then(|mut reader| rustls_pemfile::private_key(&mut reader).ok().flatten())
        .is_some()
}

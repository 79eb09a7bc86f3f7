use crate::profile::error::Result;
use crate::profile::recorder::Profiler;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// File name the report tool looks for by default.
pub const DEFAULT_OUTPUT_FILE: &str = "gmon.out";

/// Write the session to `path`, replacing any existing file.
pub fn write_profile_file(profiler: &Profiler, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    profiler.finalize(&mut writer)?;
    tracing::debug!(path = %path.display(), "profile file closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::config::ProfileConfig;
    use crate::profile::error::ProfileError;
    use tempfile::TempDir;

    #[test]
    fn test_file_matches_in_memory_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_OUTPUT_FILE);
        let p = Profiler::new(0x1000, 0x2000, ProfileConfig::default()).unwrap();
        p.record(0x1100, 0x1200);
        p.sample(0x1010);

        write_profile_file(&p, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), p.finalize_to_vec().unwrap());
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join(DEFAULT_OUTPUT_FILE);
        let p = Profiler::new(0x1000, 0x2000, ProfileConfig::default()).unwrap();
        assert!(matches!(
            write_profile_file(&p, &path),
            Err(ProfileError::Io(_))
        ));
    }
}

use crate::checksum::ChecksumVerifier;
use crate::digest::ExpectedDigest;
use crate::errors::ProvisionError;
use rockprov_hal::BlockReadOps;
use std::path::PathBuf;

/// A downloaded or local file plus the digest it is supposed to have.
///
/// `verified` only becomes true after a successful comparison in this run.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub declared: Option<ExpectedDigest>,
    pub verified: bool,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, declared: Option<ExpectedDigest>) -> Self {
        Self {
            path: path.into(),
            declared,
            verified: false,
        }
    }

    /// Digest the file and compare against the declared value.
    ///
    /// Returns the actual digest. An artifact without a declared digest cannot be verified.
    pub fn verify<R: BlockReadOps + ?Sized>(
        &mut self,
        verifier: &ChecksumVerifier<'_, R>,
    ) -> Result<String, ProvisionError> {
        let declared = self.declared.as_ref().ok_or_else(|| {
            ProvisionError::Config(format!(
                "no digest declared for {}",
                self.path.display()
            ))
        })?;
        let actual = verifier.digest(&self.path, declared.algorithm())?;
        log::info!(
            "🔎 {} {}: expected {}, actual {}",
            declared.algorithm(),
            self.path.display(),
            declared.hex(),
            actual
        );
        if !verifier.verify(&actual, declared.hex()) {
            return Err(ProvisionError::Integrity {
                subject: self.path.display().to_string(),
                expected: declared.hex().to_string(),
                actual,
            });
        }
        self.verified = true;
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use rockprov_hal::LinuxHal;

    #[test]
    fn verified_only_after_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();
        let hal = LinuxHal::new();
        let verifier = ChecksumVerifier::new(&hal);

        let good = ExpectedDigest::parse(DigestAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f72")
            .unwrap();
        let mut artifact = Artifact::new(&path, Some(good));
        assert!(!artifact.verified);
        artifact.verify(&verifier).unwrap();
        assert!(artifact.verified);

        let bad = ExpectedDigest::parse(DigestAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f73")
            .unwrap();
        let mut artifact = Artifact::new(&path, Some(bad));
        let err = artifact.verify(&verifier).unwrap_err();
        assert!(matches!(err, ProvisionError::Integrity { .. }));
        assert!(!artifact.verified);
    }
}

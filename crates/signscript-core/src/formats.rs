//! Detached-signature lookup for signing formats.
//!
//! Some formats (e.g. `gpg`) leave the signed file untouched and write the
//! signature next to it as `<file><extension>`. Everything else signs in
//! place and has no entry here.

/// How a signing format's detached signature is named and typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachedSignatureFormat {
    /// Signing format that produced the signature (`gpg`, `widevine`, ...).
    pub format: &'static str,
    /// Extension appended to the signed file's name.
    pub extension: &'static str,
    /// MIME type of the signature file.
    pub mime: &'static str,
}

impl DetachedSignatureFormat {
    /// Returns the detached signature file name for `filename`.
    #[must_use]
    pub fn filename_for(&self, filename: &str) -> String {
        format!("{filename}{}", self.extension)
    }
}

const DETACHED_SIGNATURE_FORMATS: &[DetachedSignatureFormat] = &[
    DetachedSignatureFormat {
        format: "gpg",
        extension: ".asc",
        mime: "text/plain",
    },
    DetachedSignatureFormat {
        format: "pgp",
        extension: ".asc",
        mime: "text/plain",
    },
    DetachedSignatureFormat {
        format: "widevine",
        extension: ".sig",
        mime: "application/octet-stream",
    },
    DetachedSignatureFormat {
        format: "widevine_blessed",
        extension: ".sig",
        mime: "application/octet-stream",
    },
];

/// Looks up the detached-signature descriptor for a single format.
#[must_use]
pub fn detached_signature_for(format: &str) -> Option<DetachedSignatureFormat> {
    DETACHED_SIGNATURE_FORMATS
        .iter()
        .find(|d| d.format == format)
        .copied()
}

/// Returns the detached signatures produced by `formats`, in request order.
///
/// Formats without a detached form are skipped. Formats whose
/// `(extension, mime)` pair was already produced by an earlier format are
/// dropped, since they would write the same file.
///
/// ```
/// use signscript_core::formats::detached_signatures;
///
/// let sigs = detached_signatures(&["mar", "gpg", "pgp"]);
/// assert_eq!(sigs.len(), 1);
/// assert_eq!((sigs[0].format, sigs[0].extension, sigs[0].mime), ("gpg", ".asc", "text/plain"));
/// ```
#[must_use]
pub fn detached_signatures<S: AsRef<str>>(formats: &[S]) -> Vec<DetachedSignatureFormat> {
    let mut out: Vec<DetachedSignatureFormat> = Vec::new();
    for format in formats {
        let Some(sig) = detached_signature_for(format.as_ref()) else {
            continue;
        };
        if out
            .iter()
            .any(|seen| seen.extension == sig.extension && seen.mime == sig.mime)
        {
            continue;
        }
        out.push(sig);
    }
    out
}

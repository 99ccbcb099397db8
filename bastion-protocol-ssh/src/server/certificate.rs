use russh::keys::ssh_key::certificate::CertType;
use russh::keys::ssh_key::Fingerprint;
use russh::keys::Certificate;

use crate::SshError;

/// Checks a user certificate presented for `username`.
///
/// The signature, the issuing CA and the validity window go through
/// [`Certificate::validate`]. Critical options are not supported and reject
/// the certificate outright.
pub fn validate_user_certificate(
    certificate: &Certificate,
    username: &str,
    trusted_cas: &[Fingerprint],
) -> Result<(), SshError> {
    certificate
        .validate(trusted_cas)
        .map_err(|_| SshError::CertificateRejected("untrusted CA, bad signature or expired"))?;

    if certificate.cert_type() != CertType::User {
        return Err(SshError::CertificateRejected("not a user certificate"));
    }

    if !certificate
        .valid_principals()
        .iter()
        .any(|principal| principal == username)
    {
        return Err(SshError::CertificateRejected(
            "user is not among the certificate principals",
        ));
    }

    if !certificate.critical_options().is_empty() {
        return Err(SshError::CertificateRejected("unsupported critical options"));
    }

    Ok(())
}

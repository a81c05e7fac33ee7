//! Security credential generation for the payment rail.
//!
//! The rail authenticates privileged operations (reversals) with the
//! initiator password encrypted under the rail's X.509 certificate using
//! RSA PKCS#1 v1.5 and base64-encoded. The certificate is loaded once at
//! startup; the raw password is never logged.

use crate::payments::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use std::path::Path;
use x509_parser::parse_x509_certificate;
use x509_parser::pem::parse_x509_pem;

pub struct SecurityCredential {
    public_key: RsaPublicKey,
}

impl SecurityCredential {
    /// Load the rail's certificate (PEM or DER) and keep its public key.
    pub fn from_certificate_file(path: impl AsRef<Path>) -> PaymentResult<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| PaymentError::CredentialMaterial {
            message: format!(
                "cannot read certificate {}: {}",
                path.as_ref().display(),
                e
            ),
        })?;
        Self::from_certificate_bytes(&bytes)
    }

    pub fn from_certificate_bytes(bytes: &[u8]) -> PaymentResult<Self> {
        let spki_der = match parse_x509_pem(bytes) {
            Ok((_, pem)) => {
                let cert = pem.parse_x509().map_err(|e| PaymentError::CredentialMaterial {
                    message: format!("invalid certificate in PEM: {}", e),
                })?;
                cert.public_key().raw.to_vec()
            }
            Err(_) => {
                let (_, cert) =
                    parse_x509_certificate(bytes).map_err(|e| PaymentError::CredentialMaterial {
                        message: format!("certificate is neither PEM nor DER: {}", e),
                    })?;
                cert.public_key().raw.to_vec()
            }
        };

        let public_key = RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| {
            PaymentError::CredentialMaterial {
                message: format!("certificate does not carry an RSA key: {}", e),
            }
        })?;

        Ok(Self { public_key })
    }

    /// Encrypt the initiator password into the base64 credential the rail
    /// expects. A fresh encryption is produced per call; PKCS#1 v1.5
    /// padding is randomized so outputs differ between calls.
    pub fn encrypt(&self, initiator_password: &str) -> PaymentResult<String> {
        let mut rng = rand::thread_rng();
        let ciphertext = self
            .public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, initiator_password.as_bytes())
            .map_err(|e| PaymentError::CredentialMaterial {
                message: format!("RSA encryption failed: {}", e),
            })?;
        Ok(BASE64.encode(ciphertext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_certificates() {
        assert!(SecurityCredential::from_certificate_bytes(b"not a certificate").is_err());
        assert!(SecurityCredential::from_certificate_bytes(
            b"-----BEGIN CERTIFICATE-----\nbm90IGEgY2VydA==\n-----END CERTIFICATE-----\n"
        )
        .is_err());
    }
}

//! Minimal DER plumbing for client certificates
//!
//! rcgen keys its distinguished name by attribute type, so a subject with
//! several O attributes (one per Kubernetes group) cannot be expressed
//! through `CertificateParams`. The certificate is signed by rcgen with an
//! empty subject, then the subject field of the TBSCertificate is replaced
//! with the one encoded here and the TBS is re-signed with the same CA key.

use rcgen::SigningKey;
use x509_parser::asn1_rs::{Any, Class, FromDer};
use yasna::models::ObjectIdentifier;
use zeroize::Zeroizing;

const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];
const OID_ORGANIZATION: &[u64] = &[2, 5, 4, 10];
const OID_RSA_ENCRYPTION: &[u64] = &[1, 2, 840, 113549, 1, 1, 1];

/// Context-specific tag number of the explicit certificate version
const TAG_VERSION: u32 = 0;

/// Encode an X.509 Name with one RDN per organization followed by the CN.
///
/// Organizations come before the CN, the order kubeadm-issued client
/// certificates use.
pub(crate) fn encode_subject(common_name: &str, organizations: &[String]) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for organization in organizations {
                write_attribute(writer.next(), OID_ORGANIZATION, organization);
            }
            if !common_name.is_empty() {
                write_attribute(writer.next(), OID_COMMON_NAME, common_name);
            }
        })
    })
}

fn write_attribute(writer: yasna::DERWriter<'_>, oid: &[u64], value: &str) {
    writer.write_set(|writer| {
        writer.next().write_sequence(|writer| {
            writer.next().write_oid(&ObjectIdentifier::from_slice(oid));
            writer.next().write_utf8_string(value);
        })
    })
}

/// Parse one DER element from the front of `input`, returning it together
/// with its full encoding and the remaining input
fn split_element(input: &[u8]) -> Result<(Any<'_>, &[u8], &[u8]), String> {
    let (rest, element) =
        Any::from_der(input).map_err(|e| format!("malformed DER element: {}", e))?;
    let encoded = &input[..input.len() - rest.len()];
    Ok((element, encoded, rest))
}

/// Split the content of a constructed value into its child elements
fn read_children(mut content: &[u8]) -> Result<Vec<(Any<'_>, &[u8])>, String> {
    let mut children = Vec::new();
    while !content.is_empty() {
        let (element, encoded, rest) = split_element(content)?;
        children.push((element, encoded));
        content = rest;
    }
    Ok(children)
}

/// Replace the subject of a signed certificate and re-sign it with `signer`.
///
/// `signer` must be the key that produced the original signature so the
/// signature algorithm identifiers stay valid.
pub(crate) fn replace_subject(
    cert_der: &[u8],
    subject_der: &[u8],
    signer: &impl SigningKey,
) -> Result<Vec<u8>, String> {
    let (certificate, _, _) = split_element(cert_der)?;
    let parts = read_children(certificate.data)?;
    let [(tbs, _), (_, signature_algorithm), _signature] = parts.as_slice() else {
        return Err(format!(
            "certificate has {} top-level fields, expected 3",
            parts.len()
        ));
    };

    let fields = read_children(tbs.data)?;
    let subject_index = match fields.first() {
        Some((field, _))
            if field.header.class() == Class::ContextSpecific
                && field.header.tag().0 == TAG_VERSION =>
        {
            5
        }
        _ => 4,
    };
    if fields.len() <= subject_index {
        return Err("TBSCertificate is missing the subject field".to_string());
    }

    let tbs_der = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for (index, (_, encoded)) in fields.iter().enumerate() {
                if index == subject_index {
                    writer.next().write_der(subject_der);
                } else {
                    writer.next().write_der(encoded);
                }
            }
        })
    });

    let signature = signer
        .sign(&tbs_der)
        .map_err(|e| format!("failed to sign TBSCertificate: {}", e))?;

    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(&tbs_der);
            writer.next().write_der(signature_algorithm);
            writer
                .next()
                .write_bitvec_bytes(&signature, signature.len() * 8);
        })
    }))
}

/// Return a PKCS#8 PEM for `key_pem`, wrapping PKCS#1 RSA keys as needed
pub(crate) fn normalize_private_key_pem(key_pem: &str) -> Result<Zeroizing<String>, String> {
    let parsed =
        ::pem::parse(key_pem.as_bytes()).map_err(|e| format!("failed to parse key PEM: {}", e))?;
    match parsed.tag() {
        "PRIVATE KEY" => Ok(Zeroizing::new(key_pem.trim().to_string())),
        "RSA PRIVATE KEY" => {
            let pkcs8 = Zeroizing::new(pkcs1_to_pkcs8(parsed.contents()));
            let config = ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF);
            Ok(Zeroizing::new(::pem::encode_config(
                &::pem::Pem::new("PRIVATE KEY", pkcs8.to_vec()),
                config,
            )))
        }
        other => Err(format!(
            "unsupported private key type {:?}, expected PKCS#8 or PKCS#1 RSA",
            other
        )),
    }
}

/// Wrap a PKCS#1 RSAPrivateKey in a PKCS#8 PrivateKeyInfo
fn pkcs1_to_pkcs8(pkcs1: &[u8]) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_u8(0);
            writer.next().write_sequence(|writer| {
                writer
                    .next()
                    .write_oid(&ObjectIdentifier::from_slice(OID_RSA_ENCRYPTION));
                writer.next().write_null();
            });
            writer.next().write_bytes(pkcs1);
        })
    })
}

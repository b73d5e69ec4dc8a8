//! Test PKI fixtures
//!
//! Shared by the security unit tests and, through `#[path]`, by the
//! integration test helpers, so this file only depends on rcgen and std.

use std::path::{Path, PathBuf};

use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams,
    CertificateRevocationList, CertificateRevocationListParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevokedCertParams,
    SerialNumber,
};

/// A throwaway certificate authority
pub struct TestPki {
    pub ca: Certificate,
    pub ca_key: KeyPair,
}

impl TestPki {
    pub const FUTURE: (i32, u8, u8) = (2099, 1, 1);
    pub const PAST: (i32, u8, u8) = (2021, 1, 1);

    /// A self-signed root
    pub fn new(common_name: &str) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let ca = ca_params(common_name, None).self_signed(&ca_key).unwrap();
        Self { ca, ca_key }
    }

    /// A subordinate CA signed by this one
    pub fn issue_intermediate(&self, common_name: &str, serial: u8) -> TestPki {
        let ca_key = KeyPair::generate().unwrap();
        let ca = ca_params(common_name, Some(serial))
            .signed_by(&ca_key, &self.ca, &self.ca_key)
            .unwrap();
        TestPki { ca, ca_key }
    }

    pub fn ca_der(&self) -> Vec<u8> {
        self.ca.der().to_vec()
    }

    pub fn ca_pem(&self) -> String {
        self.ca.pem()
    }

    /// Issue a leaf certificate for `localhost` and `127.0.0.1`
    pub fn issue_leaf(&self, common_name: &str, serial: u8) -> (Certificate, KeyPair) {
        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                .unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from_slice(&[serial]));
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_before = date_time_ymd(2020, 1, 1);
        params.not_after = date_time_ymd(2099, 1, 1);

        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca, &self.ca_key).unwrap();
        (cert, key)
    }

    /// A CRL signed by this CA revoking the given serial numbers
    pub fn crl(&self, revoked: &[u8], next_update: (i32, u8, u8)) -> CertificateRevocationList {
        let (year, month, day) = next_update;
        let params = CertificateRevocationListParams {
            this_update: date_time_ymd(2020, 1, 1),
            next_update: date_time_ymd(year, month, day),
            crl_number: SerialNumber::from_slice(&[1]),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|&serial| RevokedCertParams {
                    serial_number: SerialNumber::from_slice(&[serial]),
                    revocation_time: date_time_ymd(2020, 6, 1),
                    reason_code: None,
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params.signed_by(&self.ca, &self.ca_key).unwrap()
    }
}

fn ca_params(common_name: &str, serial: Option<u8>) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "NETCONF Test");
    params.distinguished_name = dn;
    params.serial_number = serial.map(|serial| SerialNumber::from_slice(&[serial]));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2099, 1, 1);
    params
}

pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

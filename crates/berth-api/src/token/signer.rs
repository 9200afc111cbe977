// Berth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! RS256 signing and validation of registry tokens

use crate::error::{ApiError, ApiResult};
use crate::token::claims::Claims;
use data_encoding::BASE32_NOPAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use ring::digest;
use std::path::Path;
use tracing::{debug, info};

// AlgorithmIdentifier for rsaEncryption with NULL parameters
const RSA_ALGORITHM_ID: &[u8] = &[0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00];

/// Signs registry tokens with an RSA private key and validates them with the matching public key
pub struct TokenSigner {
    issuer: String,
    key_id: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenSigner {
    /// Load the key pair from PEM files
    pub fn from_files(issuer: &str, private_key: &Path, public_key: &Path) -> ApiResult<Self> {
        let private_pem = std::fs::read(private_key)?;
        let public_pem = std::fs::read(public_key)?;
        let signer = Self::from_pem(issuer, &private_pem, &public_pem)?;
        info!(key_id = %signer.key_id, "Loaded token signing key from {}", private_key.display());
        Ok(signer)
    }

    /// Build from PEM encoded keys
    pub fn from_pem(issuer: &str, private_pem: &[u8], public_pem: &[u8]) -> ApiResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)?;
        let key_id = key_id_from_public_pem(public_pem)?;

        Ok(Self { issuer: issuer.to_string(), key_id, encoding_key, decoding_key })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Fingerprint of the public key, used as the `kid` header
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign claims into a compact JWT
    pub fn sign(&self, claims: &Claims) -> ApiResult<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        let token = encode(&header, claims, &self.encoding_key)?;
        debug!(sub = %claims.sub, jti = %claims.jti, "Signed registry token");
        Ok(token)
    }

    /// Verify signature, issuer, audience and lifetime of a token
    pub fn validate(&self, token: &str, audience: &str) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| ApiError::unauthorized(format!("invalid registry token: {}", e)))?;
        Ok(data.claims)
    }
}

/// libtrust style key id: the first 240 bits of the SHA-256 of the DER encoded
/// SubjectPublicKeyInfo, base32 encoded and split into groups of four
pub fn key_id_from_public_pem(data: &[u8]) -> ApiResult<String> {
    let block = pem::parse(data).map_err(|e| ApiError::invalid_argument(format!("invalid PEM data: {}", e)))?;
    let spki = match block.tag() {
        "PUBLIC KEY" => block.contents().to_vec(),
        "RSA PUBLIC KEY" => wrap_pkcs1_public_key(block.contents()),
        other => return Err(ApiError::invalid_argument(format!("unsupported public key type: {}", other))),
    };
    Ok(key_id_from_spki(&spki))
}

pub fn key_id_from_spki(spki_der: &[u8]) -> String {
    let hash = digest::digest(&digest::SHA256, spki_der);
    let encoded = BASE32_NOPAD.encode(&hash.as_ref()[..30]);
    encoded.as_bytes().chunks(4).map(|c| String::from_utf8_lossy(c).into_owned()).collect::<Vec<_>>().join(":")
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len.to_be_bytes().iter().copied().skip_while(|b| *b == 0).collect();
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend(bytes);
    out
}

// SubjectPublicKeyInfo around a PKCS#1 RSAPublicKey
fn wrap_pkcs1_public_key(pkcs1: &[u8]) -> Vec<u8> {
    let mut bit_string = vec![0x03];
    bit_string.extend(der_length(pkcs1.len() + 1));
    bit_string.push(0x00);
    bit_string.extend_from_slice(pkcs1);

    let mut spki = vec![0x30];
    spki.extend(der_length(RSA_ALGORITHM_ID.len() + bit_string.len()));
    spki.extend_from_slice(RSA_ALGORITHM_ID);
    spki.extend(bit_string);
    spki
}

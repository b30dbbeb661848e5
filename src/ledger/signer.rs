//! secp256k1 key handling and EIP-155 legacy transaction signing.

use k256::ecdsa::{RecoveryId, Signature, SigningKey};

use crate::ledger::abi::keccak256;
use crate::ledger::rlp;
use crate::ledger::types::{Address, LedgerError, LedgerResult, TxHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::uint(self.nonce as u128),
            rlp::uint(self.gas_price),
            rlp::uint(self.gas_limit as u128),
            rlp::bytes(&self.to.0),
            rlp::uint(self.value),
            rlp::bytes(&self.data),
        ]
    }

    /// EIP-155 signing payload: the six fields followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::uint(chain_id as u128));
        fields.push(rlp::uint(0));
        fields.push(rlp::uint(0));
        rlp::list(&fields)
    }

    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        keccak256(&self.signing_payload(chain_id))
    }
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn from_hex(private_key: &str) -> LedgerResult<Self> {
        let digits = private_key.trim().trim_start_matches("0x");
        let bytes = hex::decode(digits).map_err(|_| LedgerError::Config("private key is not hex".into()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| LedgerError::Config("private key is not a valid secp256k1 scalar".into()))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn verifying_key(&self) -> &k256::ecdsa::VerifyingKey {
        self.key.verifying_key()
    }

    /// Low-s recoverable signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> LedgerResult<(Signature, RecoveryId)> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| LedgerError::Signing(e.to_string()))?;

        // Ethereum only accepts low-s signatures.
        match signature.normalize_s() {
            Some(normalized) => Ok((
                normalized,
                RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
            )),
            None => Ok((signature, recovery_id)),
        }
    }

    pub fn sign(&self, tx: &LegacyTransaction, chain_id: u64) -> LedgerResult<SignedTransaction> {
        let (signature, recovery_id) = self.sign_digest(&tx.signing_hash(chain_id))?;
        let rs = signature.to_bytes();
        let v = chain_id as u128 * 2 + 35 + recovery_id.to_byte() as u128;

        let mut fields = tx.base_fields();
        fields.push(rlp::uint(v));
        fields.push(rlp::bytes(rlp::trim_leading_zeros(&rs[..32])));
        fields.push(rlp::bytes(rlp::trim_leading_zeros(&rs[32..])));
        let raw = rlp::list(&fields);
        let hash = TxHash(keccak256(&raw));

        Ok(SignedTransaction { raw, hash })
    }
}

fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

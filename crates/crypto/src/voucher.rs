use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{eip191_hash_message, keccak256, Address, Bytes, Signature, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use tracing::debug;

use chopshop_core::ClaimVoucher;

/// Default voucher lifetime (one hour).
pub const DEFAULT_VALIDITY_SECS: u64 = 3600;

/// Packed message length: address(20) + 4 x uint256(32) + address(20)
pub const VOUCHER_MESSAGE_LEN: usize = 20 + 32 * 4 + 20;

#[derive(Debug, thiserror::Error)]
pub enum VoucherError {
    #[error("Amount must be positive")]
    ZeroAmount,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Voucher expired at {deadline} (now {now})")]
    Expired { deadline: u64, now: u64 },

    #[error("Signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch { expected: Address, recovered: Address },
}

pub type Result<T> = std::result::Result<T, VoucherError>;

/// Chain binding folded into every voucher hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoucherDomain {
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// Tightly packed voucher message, in the exact order the verifier hashes it:
/// `claimant || amount || nonce || deadline || chain_id || verifying_contract`.
pub fn voucher_message(
    claimant: &Address,
    amount: U256,
    nonce: U256,
    deadline: u64,
    domain: &VoucherDomain,
) -> [u8; VOUCHER_MESSAGE_LEN] {
    let mut out = [0u8; VOUCHER_MESSAGE_LEN];
    out[0..20].copy_from_slice(claimant.as_slice());
    out[20..52].copy_from_slice(&amount.to_be_bytes::<32>());
    out[52..84].copy_from_slice(&nonce.to_be_bytes::<32>());
    out[84..116].copy_from_slice(&U256::from(deadline).to_be_bytes::<32>());
    out[116..148].copy_from_slice(&U256::from(domain.chain_id).to_be_bytes::<32>());
    out[148..168].copy_from_slice(domain.verifying_contract.as_slice());
    out
}

/// `keccak256` of the packed voucher message (before the personal-sign prefix).
pub fn voucher_message_hash(
    claimant: &Address,
    amount: U256,
    nonce: U256,
    deadline: u64,
    domain: &VoucherDomain,
) -> B256 {
    keccak256(voucher_message(claimant, amount, nonce, deadline, domain))
}

/// The digest the verifier actually recovers against:
/// `keccak256("\x19Ethereum Signed Message:\n32" || message_hash)`.
pub fn voucher_signing_hash(message_hash: &B256) -> B256 {
    eip191_hash_message(message_hash.as_slice())
}

/// Issues signed claim vouchers.
///
/// Holds the signing key for the life of the process. The key is read-only
/// after construction, so a single signer can be shared across concurrent
/// requests without locking. Nonce uniqueness is the caller's job.
#[derive(Clone)]
pub struct VoucherSigner {
    signer: PrivateKeySigner,
    domain: VoucherDomain,
    validity_secs: u64,
}

impl VoucherSigner {
    pub fn new(signer: PrivateKeySigner, domain: VoucherDomain) -> Self {
        Self {
            signer,
            domain,
            validity_secs: DEFAULT_VALIDITY_SECS,
        }
    }

    pub fn with_validity(mut self, validity_secs: u64) -> Self {
        self.validity_secs = validity_secs;
        self
    }

    /// Address the verifier must be configured with.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn domain(&self) -> &VoucherDomain {
        &self.domain
    }

    pub fn validity_secs(&self) -> u64 {
        self.validity_secs
    }

    /// Sign a voucher whose deadline is now + the validity window.
    pub fn sign(&self, claimant: Address, amount: U256, nonce: U256) -> Result<ClaimVoucher> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.sign_at(claimant, amount, nonce, now)
    }

    /// Sign a voucher as if the current time were `now`.
    pub fn sign_at(
        &self,
        claimant: Address,
        amount: U256,
        nonce: U256,
        now: u64,
    ) -> Result<ClaimVoucher> {
        if amount.is_zero() {
            return Err(VoucherError::ZeroAmount);
        }
        let deadline = now.saturating_add(self.validity_secs);
        let message_hash = voucher_message_hash(&claimant, amount, nonce, deadline, &self.domain);

        // sign_message applies the EIP-191 prefix to the 32 hash bytes
        let signature = self
            .signer
            .sign_message_sync(message_hash.as_slice())
            .map_err(|e| VoucherError::SigningFailed(e.to_string()))?;

        debug!(
            "Signed voucher for {} (amount={}, deadline={})",
            claimant, amount, deadline
        );

        Ok(ClaimVoucher {
            claimant,
            amount,
            nonce,
            deadline,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
        })
    }
}

impl fmt::Debug for VoucherSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoucherSigner")
            .field("address", &self.address())
            .field("domain", &self.domain)
            .field("validity_secs", &self.validity_secs)
            .finish_non_exhaustive()
    }
}

/// Recover the address that signed `voucher` under `domain`.
pub fn recover_voucher_signer(voucher: &ClaimVoucher, domain: &VoucherDomain) -> Result<Address> {
    let signature = Signature::try_from(voucher.signature.as_ref())
        .map_err(|e| VoucherError::InvalidSignature(e.to_string()))?;
    let message_hash = voucher_message_hash(
        &voucher.claimant,
        voucher.amount,
        voucher.nonce,
        voucher.deadline,
        domain,
    );
    signature
        .recover_address_from_prehash(&voucher_signing_hash(&message_hash))
        .map_err(|e| VoucherError::InvalidSignature(e.to_string()))
}

/// Check a voucher the way the ledger does: unexpired at `now` and signed
/// by `expected_signer`.
pub fn verify_voucher(
    voucher: &ClaimVoucher,
    domain: &VoucherDomain,
    expected_signer: &Address,
    now: u64,
) -> Result<()> {
    if voucher.is_expired(now) {
        return Err(VoucherError::Expired {
            deadline: voucher.deadline,
            now,
        });
    }
    let recovered = recover_voucher_signer(voucher, domain)?;
    if recovered != *expected_signer {
        return Err(VoucherError::SignerMismatch {
            expected: *expected_signer,
            recovered,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn domain() -> VoucherDomain {
        VoucherDomain {
            chain_id: 8453,
            verifying_contract: address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
        }
    }

    fn test_signer() -> VoucherSigner {
        let key = PrivateKeySigner::from_bytes(&B256::repeat_byte(0x42)).unwrap();
        VoucherSigner::new(key, domain())
    }

    #[test]
    fn test_known_key_address() {
        let key: PrivateKeySigner =
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
                .parse()
                .unwrap();
        assert_eq!(
            key.address(),
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[test]
    fn test_message_layout() {
        let claimant = Address::repeat_byte(0x11);
        let msg = voucher_message(&claimant, U256::from(7u64), U256::from(9u64), 1000, &domain());

        assert_eq!(msg.len(), 168);
        assert_eq!(&msg[0..20], claimant.as_slice());
        assert_eq!(msg[51], 7);
        assert!(msg[20..51].iter().all(|b| *b == 0));
        assert_eq!(msg[83], 9);
        assert_eq!(&msg[114..116], &1000u16.to_be_bytes());
        assert_eq!(&msg[144..148], &8453u32.to_be_bytes());
        assert_eq!(&msg[148..168], domain().verifying_contract.as_slice());
    }

    #[test]
    fn test_independent_hash_rederivation_matches() {
        let signer = test_signer();
        let claimant = Address::repeat_byte(0x22);
        let voucher = signer
            .sign_at(claimant, U256::from(150u64), U256::from(77u64), 1_700_000_000)
            .unwrap();

        // Re-derive the packed encoding by hand
        let mut packed = Vec::new();
        packed.extend_from_slice(claimant.as_slice());
        packed.extend_from_slice(&U256::from(150u64).to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(77u64).to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(1_700_003_600u64).to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(8453u64).to_be_bytes::<32>());
        packed.extend_from_slice(domain().verifying_contract.as_slice());
        let expected_hash = keccak256(&packed);

        let mut prefixed = b"\x19Ethereum Signed Message:\n32".to_vec();
        prefixed.extend_from_slice(expected_hash.as_slice());
        let expected_digest = keccak256(&prefixed);

        let sig = Signature::try_from(voucher.signature.as_ref()).unwrap();
        let recovered = sig.recover_address_from_prehash(&expected_digest).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_deadline_is_now_plus_validity() {
        let signer = test_signer().with_validity(600);
        let voucher = signer
            .sign_at(Address::repeat_byte(1), U256::from(1u64), U256::from(1u64), 5000)
            .unwrap();
        assert_eq!(voucher.deadline, 5600);
        assert_eq!(voucher.signature.len(), 65);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let result = test_signer().sign_at(Address::ZERO, U256::ZERO, U256::from(1u64), 0);
        assert!(matches!(result, Err(VoucherError::ZeroAmount)));
    }

    #[test]
    fn test_verify_accepts_valid_voucher() {
        let signer = test_signer();
        let voucher = signer
            .sign_at(Address::repeat_byte(3), U256::from(10u64), U256::from(2u64), 1000)
            .unwrap();
        assert!(verify_voucher(&voucher, &domain(), &signer.address(), 1000).is_ok());
        assert!(verify_voucher(&voucher, &domain(), &signer.address(), voucher.deadline).is_ok());
    }

    #[test]
    fn test_verify_rejects_expired_voucher() {
        let signer = test_signer();
        let voucher = signer
            .sign_at(Address::repeat_byte(3), U256::from(10u64), U256::from(2u64), 1000)
            .unwrap();
        let result = verify_voucher(&voucher, &domain(), &signer.address(), voucher.deadline + 1);
        assert!(matches!(result, Err(VoucherError::Expired { .. })));
    }

    #[test]
    fn test_tampered_field_changes_recovered_signer() {
        let signer = test_signer();
        let mut voucher = signer
            .sign_at(Address::repeat_byte(3), U256::from(10u64), U256::from(2u64), 1000)
            .unwrap();
        voucher.amount = U256::from(10_000u64);
        let result = verify_voucher(&voucher, &domain(), &signer.address(), 1000);
        assert!(matches!(
            result,
            Err(VoucherError::SignerMismatch { .. }) | Err(VoucherError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_other_domain_does_not_verify() {
        let signer = test_signer();
        let voucher = signer
            .sign_at(Address::repeat_byte(3), U256::from(10u64), U256::from(2u64), 1000)
            .unwrap();
        let other = VoucherDomain { chain_id: 1, ..domain() };
        let result = verify_voucher(&voucher, &other, &signer.address(), 1000);
        assert!(matches!(
            result,
            Err(VoucherError::SignerMismatch { .. }) | Err(VoucherError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let signer = test_signer();
        let debug = format!("{:?}", signer);
        assert!(debug.contains("VoucherSigner"));
        assert!(!debug.contains(&"42".repeat(32)));
    }
}

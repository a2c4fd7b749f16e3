//! Voucher issuance and redemption integration tests
//!
//! Vouchers come out of the claim service and are redeemed against the
//! ledger's verifier. Covers:
//! 1. Happy path: issued voucher mints stars in the current epoch
//! 2. Single use, sender binding and expiry
//! 3. Domain binding (chain id, contract, trusted signer)
//! 4. Concurrent issuance yields distinct nonces

use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;

use chopshop_aggregator::MemoryArtifactStore;
use chopshop_core::{ChopsError, ClaimVoucher};
use chopshop_crypto::{VoucherDomain, VoucherSigner};
use chopshop_daemon::{ClaimService, VoucherRequest, VoucherResponse};
use chopshop_settlement::{LedgerError, LedgerReader, MockLedger, MockLedgerConfig};

const T0: u64 = 1_700_000_000;
const PLAYER: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";

type Service = ClaimService<MockLedger, Arc<MemoryArtifactStore>>;

fn domain() -> VoucherDomain {
    VoucherDomain {
        chain_id: 8453,
        verifying_contract: Address::repeat_byte(0xC0),
    }
}

fn ledger_trusting(signer: Address, domain: VoucherDomain) -> MockLedger {
    MockLedger::new(MockLedgerConfig {
        chain_id: domain.chain_id,
        contract: domain.verifying_contract,
        voucher_signer: signer,
        root_setter: Address::repeat_byte(0xAD),
        epoch_duration: 604_800,
        start_time: Some(T0),
    })
}

fn service_with(key: PrivateKeySigner, domain: VoucherDomain, ledger: &MockLedger) -> Service {
    ClaimService::new(
        VoucherSigner::new(key, domain),
        ledger.clone(),
        Arc::new(MemoryArtifactStore::new()),
    )
    .with_max_stars_per_claim(Some(1_000))
}

fn setup() -> (MockLedger, Service) {
    let key = PrivateKeySigner::random();
    let ledger = ledger_trusting(key.address(), domain());
    let service = service_with(key, domain(), &ledger);
    (ledger, service)
}

fn request(stars: u64) -> VoucherRequest {
    VoucherRequest {
        claimant_address: PLAYER.to_string(),
        stars_earned: stars,
    }
}

fn player() -> Address {
    PLAYER.parse().unwrap()
}

fn to_voucher(response: &VoucherResponse) -> ClaimVoucher {
    ClaimVoucher {
        claimant: player(),
        amount: response.amount,
        nonce: response.nonce,
        deadline: response.deadline,
        signature: response.signature.clone(),
    }
}

// ============================================================================
// 1. Happy path
// ============================================================================

#[tokio::test]
async fn test_issued_voucher_mints_stars() {
    let (ledger, service) = setup();

    let first = service.issue_voucher(&request(120)).unwrap();
    let second = service.issue_voucher(&request(30)).unwrap();
    ledger.connect(player()).claim_stars(&to_voucher(&first)).unwrap();
    ledger.connect(player()).claim_stars(&to_voucher(&second)).unwrap();

    assert_eq!(ledger.stars_balance(player(), 1).await.unwrap(), U256::from(150u64));
    let events = ledger.star_claim_events().await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.epoch == 1 && e.player == player()));
}

// ============================================================================
// 2. Single use, sender binding, expiry
// ============================================================================

#[tokio::test]
async fn test_voucher_is_single_use() {
    let (ledger, service) = setup();
    let voucher = to_voucher(&service.issue_voucher(&request(10)).unwrap());

    ledger.connect(player()).claim_stars(&voucher).unwrap();
    let err = ledger.connect(player()).claim_stars(&voucher).unwrap_err();
    assert!(matches!(err, LedgerError::NonceUsed));
    assert_eq!(ledger.stars_balance(player(), 1).await.unwrap(), U256::from(10u64));
}

#[test]
fn test_voucher_bound_to_claimant() {
    let (ledger, service) = setup();
    let voucher = to_voucher(&service.issue_voucher(&request(10)).unwrap());

    let err = ledger
        .connect(Address::repeat_byte(0x99))
        .claim_stars(&voucher)
        .unwrap_err();
    assert!(matches!(err, LedgerError::VoucherRejected(_)));

    // Changing the claimant breaks the signature.
    let mut forged = voucher.clone();
    forged.claimant = Address::repeat_byte(0x99);
    let err = ledger
        .connect(Address::repeat_byte(0x99))
        .claim_stars(&forged)
        .unwrap_err();
    assert!(matches!(err, LedgerError::VoucherRejected(_)));
}

#[test]
fn test_tampered_amount_rejected() {
    let (ledger, service) = setup();
    let mut voucher = to_voucher(&service.issue_voucher(&request(10)).unwrap());
    voucher.amount = U256::from(10_000u64);
    let err = ledger.connect(player()).claim_stars(&voucher).unwrap_err();
    assert!(matches!(err, LedgerError::VoucherRejected(_)));
}

#[test]
fn test_expired_voucher_rejected() {
    let (ledger, service) = setup();
    let response = service.issue_voucher(&request(10)).unwrap();

    ledger.set_time(response.deadline);
    let at_deadline = ledger.connect(player()).claim_stars(&to_voucher(&response));
    assert!(at_deadline.is_ok());

    let late = service.issue_voucher(&request(10)).unwrap();
    ledger.set_time(late.deadline + 1);
    let err = ledger.connect(player()).claim_stars(&to_voucher(&late)).unwrap_err();
    assert!(matches!(err, LedgerError::VoucherRejected(_)));
}

#[test]
fn test_invalid_requests_are_validation_errors() {
    let (_ledger, service) = setup();
    assert!(matches!(
        service.issue_voucher(&request(0)),
        Err(ChopsError::Validation(_))
    ));
    assert!(matches!(
        service.issue_voucher(&request(1_001)),
        Err(ChopsError::Validation(_))
    ));
    service.issue_voucher(&request(1_000)).unwrap();
}

// ============================================================================
// 3. Domain binding
// ============================================================================

#[test]
fn test_voucher_for_other_chain_rejected() {
    let key = PrivateKeySigner::random();
    let ledger = ledger_trusting(key.address(), domain());
    let other_chain = VoucherDomain {
        chain_id: 1,
        ..domain()
    };
    let service = service_with(key, other_chain, &ledger);

    let voucher = to_voucher(&service.issue_voucher(&request(10)).unwrap());
    let err = ledger.connect(player()).claim_stars(&voucher).unwrap_err();
    assert!(matches!(err, LedgerError::VoucherRejected(_)));
}

#[test]
fn test_voucher_for_other_contract_rejected() {
    let key = PrivateKeySigner::random();
    let ledger = ledger_trusting(key.address(), domain());
    let other_contract = VoucherDomain {
        verifying_contract: Address::repeat_byte(0xC1),
        ..domain()
    };
    let service = service_with(key, other_contract, &ledger);

    let voucher = to_voucher(&service.issue_voucher(&request(10)).unwrap());
    assert!(ledger.connect(player()).claim_stars(&voucher).is_err());
}

#[test]
fn test_untrusted_signer_rejected() {
    let trusted = PrivateKeySigner::random();
    let ledger = ledger_trusting(trusted.address(), domain());
    let service = service_with(PrivateKeySigner::random(), domain(), &ledger);

    let voucher = to_voucher(&service.issue_voucher(&request(10)).unwrap());
    let err = ledger.connect(player()).claim_stars(&voucher).unwrap_err();
    assert!(matches!(err, LedgerError::VoucherRejected(_)));
}

// ============================================================================
// 4. Concurrent issuance
// ============================================================================

#[tokio::test]
async fn test_concurrent_issuance_unique_nonces() {
    let (ledger, service) = setup();
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.issue_voucher(&request(1)).unwrap()
        }));
    }

    let mut nonces = HashSet::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(nonces.insert(response.nonce));
        ledger.connect(player()).claim_stars(&to_voucher(&response)).unwrap();
    }
    assert_eq!(ledger.stars_balance(player(), 1).await.unwrap(), U256::from(32u64));
}

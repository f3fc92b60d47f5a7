use crate as pallet_asset_token;
use crate::LedgerBackend;
use frame_support::{
    derive_impl,
    dispatch::DispatchResult,
    parameter_types,
    traits::{ConstU32, ConstU64, Time},
};
use sp_core::H256;
use sp_runtime::{
    traits::{BlakeTwo256, IdentityLookup},
    BuildStorage, DispatchError,
};
use std::{cell::RefCell, collections::BTreeMap};

type Block = frame_system::mocking::MockBlock<Test>;

// Configure a mock runtime to test the pallet.
frame_support::construct_runtime!(
    pub enum Test {
        System: frame_system,
        AssetToken: pallet_asset_token,
    }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
    type BaseCallFilter = frame_support::traits::Everything;
    type BlockWeights = ();
    type BlockLength = ();
    type DbWeight = ();
    type RuntimeOrigin = RuntimeOrigin;
    type RuntimeCall = RuntimeCall;
    type Nonce = u64;
    type Hash = H256;
    type Hashing = BlakeTwo256;
    type AccountId = u64;
    type Lookup = IdentityLookup<Self::AccountId>;
    type Block = Block;
    type RuntimeEvent = RuntimeEvent;
    type BlockHashCount = ConstU64<250>;
    type Version = ();
    type PalletInfo = PalletInfo;
    type AccountData = ();
    type OnNewAccount = ();
    type OnKilledAccount = ();
    type SystemWeightInfo = ();
    type SS58Prefix = ();
    type OnSetCode = ();
    type MaxConsumers = ConstU32<16>;
}

thread_local! {
    static BALANCES: RefCell<BTreeMap<(Vec<u8>, u64), u128>> = RefCell::new(BTreeMap::new());
    static SUPPLY: RefCell<BTreeMap<Vec<u8>, u128>> = RefCell::new(BTreeMap::new());
    static NOW: RefCell<u64> = const { RefCell::new(0) };
}

/// In-memory coin ledger standing in for the runtime's balances backend.
pub struct MockLedger;

impl MockLedger {
    pub fn balance_of(denom: &[u8], who: u64) -> u128 {
        BALANCES.with(|b| b.borrow().get(&(denom.to_vec(), who)).copied().unwrap_or(0))
    }

    pub fn supply_of(denom: &[u8]) -> u128 {
        SUPPLY.with(|s| s.borrow().get(denom).copied().unwrap_or(0))
    }

    /// Credits `who` out of thin air, adjusting supply to match.
    pub fn set_balance(denom: &[u8], who: u64, amount: u128) {
        BALANCES.with(|b| {
            b.borrow_mut().insert((denom.to_vec(), who), amount);
        });
        SUPPLY.with(|s| {
            let mut s = s.borrow_mut();
            let supply = s.entry(denom.to_vec()).or_insert(0);
            *supply += amount;
        });
    }

    pub fn reset() {
        BALANCES.with(|b| b.borrow_mut().clear());
        SUPPLY.with(|s| s.borrow_mut().clear());
    }
}

impl LedgerBackend<u64> for MockLedger {
    fn balance(who: &u64, denom: &[u8]) -> u128 {
        Self::balance_of(denom, *who)
    }

    fn transfer(from: &u64, to: &u64, denom: &[u8], amount: u128) -> DispatchResult {
        BALANCES.with(|b| {
            let mut b = b.borrow_mut();
            let from_balance = b.get(&(denom.to_vec(), *from)).copied().unwrap_or(0);
            if from_balance < amount {
                return Err(DispatchError::Other("mock ledger: insufficient funds"));
            }
            b.insert((denom.to_vec(), *from), from_balance - amount);
            let to_balance = b.get(&(denom.to_vec(), *to)).copied().unwrap_or(0);
            b.insert((denom.to_vec(), *to), to_balance + amount);
            Ok(())
        })
    }

    fn burn(from: &u64, denom: &[u8], amount: u128) -> DispatchResult {
        BALANCES.with(|b| {
            let mut b = b.borrow_mut();
            let from_balance = b.get(&(denom.to_vec(), *from)).copied().unwrap_or(0);
            if from_balance < amount {
                return Err(DispatchError::Other("mock ledger: insufficient funds"));
            }
            b.insert((denom.to_vec(), *from), from_balance - amount);
            Ok(())
        })?;
        SUPPLY.with(|s| {
            let mut s = s.borrow_mut();
            let supply = s.entry(denom.to_vec()).or_insert(0);
            *supply = supply.saturating_sub(amount);
        });
        Ok(())
    }

    fn mint(to: &u64, denom: &[u8], amount: u128) -> DispatchResult {
        BALANCES.with(|b| {
            let mut b = b.borrow_mut();
            let to_balance = b.get(&(denom.to_vec(), *to)).copied().unwrap_or(0);
            b.insert((denom.to_vec(), *to), to_balance + amount);
        });
        SUPPLY.with(|s| {
            let mut s = s.borrow_mut();
            let supply = s.entry(denom.to_vec()).or_insert(0);
            *supply += amount;
        });
        Ok(())
    }
}

/// Manually advanced logical clock.
pub struct MockTime;

impl Time for MockTime {
    type Moment = u64;

    fn now() -> u64 {
        NOW.with(|n| *n.borrow())
    }
}

pub fn set_now(now: u64) {
    NOW.with(|n| *n.borrow_mut() = now);
}

parameter_types! {
    pub static UpgradeGracePeriod: u64 = 3_600;
    pub static UpgradeDecisionTimeout: u64 = 1_000_000;
}

impl pallet_asset_token::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type Ledger = MockLedger;
    type TimeProvider = MockTime;
    type UpgradeGracePeriod = UpgradeGracePeriod;
    type UpgradeDecisionTimeout = UpgradeDecisionTimeout;
}

// Build genesis storage according to the mock runtime.
pub fn new_test_ext() -> sp_io::TestExternalities {
    MockLedger::reset();
    set_now(0);
    UpgradeGracePeriod::set(3_600);
    UpgradeDecisionTimeout::set(1_000_000);

    let t = frame_system::GenesisConfig::<Test>::default().build_storage().unwrap();
    let mut ext: sp_io::TestExternalities = t.into();
    ext.execute_with(|| System::set_block_number(1));
    ext
}

#![cfg_attr(not(feature = "std"), no_std)]
// Calls carry constant placeholder weights until generated WeightInfo is wired in
#![allow(deprecated)]
#![allow(clippy::let_unit_value)]

use frame_support::{dispatch::DispatchResult, ensure, pallet_prelude::*, traits::Time};
use frame_system::{ensure_signed, pallet_prelude::*};
use sp_core::U256;
use sp_runtime::{traits::Saturating, PerThing, Permill, RuntimeDebug};
use sp_std::{collections::btree_map::BTreeMap, prelude::*};

pub use pallet::*;

#[cfg(test)]
mod mock;


#[cfg(feature = "runtime-benchmarks")]
mod benchmarking;

/// The current storage version.
const STORAGE_VERSION: StorageVersion = StorageVersion::new(1);

const LOG_TARGET: &str = "runtime::asset-token";

/// Initial version of every token issued without the `Ibc` feature.
pub const TOKEN_VERSION_V0: u32 = 0;
/// Version of a token whose upgrade decision has been made.
pub const TOKEN_VERSION_V1: u32 = 1;

/// Token identifier: `lowercase(subunit) ++ "-" ++ hex(issuer)`.
pub type DenomOf = BoundedVec<u8, ConstU32<128>>;
/// Symbol and subunit strings.
pub type TokenSymbolOf = BoundedVec<u8, ConstU32<32>>;

/// Maximum number of distinct features a token can carry.
pub const MAX_FEATURES: u32 = 5;

/// Optional capabilities of a token, fixed at issuance except for `Ibc`,
/// which may additionally be enabled through the delayed upgrade path.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, MaxEncodedLen, TypeInfo, RuntimeDebug)]
pub enum Feature {
    Minting = 0,
    Burning = 1,
    Freezing = 2,
    Whitelisting = 3,
    Ibc = 4,
}

impl Feature {
    /// Parses a raw feature code supplied at issuance.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Feature::Minting),
            1 => Some(Feature::Burning),
            2 => Some(Feature::Freezing),
            3 => Some(Feature::Whitelisting),
            4 => Some(Feature::Ibc),
            _ => None,
        }
    }
}

/// Definition of a managed token. Rates and features are immutable after
/// issuance; `version` and the `Ibc` feature are mutated only by the upgrade
/// workflow.
#[derive(Clone, PartialEq, Eq, Encode, Decode, MaxEncodedLen, TypeInfo, RuntimeDebug)]
pub struct TokenDefinition<AccountId> {
    pub denom: DenomOf,
    pub issuer: AccountId,
    pub symbol: TokenSymbolOf,
    pub subunit: TokenSymbolOf,
    pub precision: u8,
    pub burn_rate: Permill,
    pub send_commission_rate: Permill,
    pub features: BoundedVec<Feature, ConstU32<MAX_FEATURES>>,
    pub version: u32,
}

impl<AccountId: PartialEq> TokenDefinition<AccountId> {
    pub fn is_issuer(&self, account: &AccountId) -> bool {
        &self.issuer == account
    }

    pub fn is_feature_enabled(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Interval of a requested token upgrade. For the delayed (IBC-enabling)
/// path `end_time = start_time + grace period`; for the immediate path both
/// are the request time.
#[derive(Clone, PartialEq, Eq, Encode, Decode, MaxEncodedLen, TypeInfo, RuntimeDebug)]
pub struct TokenUpgradeStatus<Moment> {
    pub ibc_enabled: bool,
    pub start_time: Moment,
    pub end_time: Moment,
}

/// Why a transfer batch is executed. Rates are charged only on `Regular`
/// transfers: in the three IBC flows the paying party is a system escrow
/// account, not a voluntary sender.
#[derive(Clone, Copy, PartialEq, Eq, RuntimeDebug, Default)]
pub enum TransferPurpose {
    #[default]
    Regular,
    IbcIncoming,
    IbcAck,
    IbcTimeout,
}

/// One side of a multi-party transfer: an account with the coins it sends
/// (input leg) or receives (output leg). Coins are `(denom, amount)` pairs.
#[derive(Clone, PartialEq, Eq, RuntimeDebug)]
pub struct SendLeg<AccountId> {
    pub account: AccountId,
    pub coins: Vec<(Vec<u8>, u128)>,
}

/// All gross debits or credits of one token within one batch, keyed by
/// account.
pub type AccountOperationMap<AccountId> = BTreeMap<AccountId, u128>;

/// Balance-ledger capability. The surrounding runtime supplies the
/// implementation; it performs the actual coin movement and answers balance
/// queries. Implementations must not re-invoke the pre-transfer hook for
/// movements requested through this trait.
pub trait LedgerBackend<AccountId> {
    fn balance(who: &AccountId, denom: &[u8]) -> u128;
    fn transfer(from: &AccountId, to: &AccountId, denom: &[u8], amount: u128) -> DispatchResult;
    fn burn(from: &AccountId, denom: &[u8], amount: u128) -> DispatchResult;
    fn mint(to: &AccountId, denom: &[u8], amount: u128) -> DispatchResult;
}

/// Groups transfer legs into per-denom account operation maps. Amounts for
/// the same account accumulate; positions are gross, never netted.
fn group_by_denom<AccountId: Ord + Clone>(
    legs: &[SendLeg<AccountId>],
) -> BTreeMap<Vec<u8>, AccountOperationMap<AccountId>> {
    let mut grouped: BTreeMap<Vec<u8>, AccountOperationMap<AccountId>> = BTreeMap::new();
    for leg in legs {
        for (denom, amount) in &leg.coins {
            let ops = grouped.entry(denom.clone()).or_default();
            let entry = ops.entry(leg.account.clone()).or_insert(0);
            *entry = entry.saturating_add(*amount);
        }
    }
    grouped
}

/// Applies `f` to every entry in ascending key order, stopping at the first
/// error. `BTreeMap` iteration is already sorted, which makes every effectful
/// pass over a batch reproducible across re-execution.
fn try_for_each_deterministic<K: Ord, V, F>(map: &BTreeMap<K, V>, mut f: F) -> DispatchResult
where
    F: FnMut(&K, &V) -> DispatchResult,
{
    for (key, value) in map {
        f(key, value)?;
    }
    Ok(())
}

fn non_issuer_sum<AccountId: Ord>(
    ops: &AccountOperationMap<AccountId>,
    issuer: &AccountId,
) -> u128 {
    ops.iter()
        .filter(|(account, _)| *account != issuer)
        .map(|(_, amount)| *amount)
        .fold(0u128, |sum, amount| sum.saturating_add(amount))
}

/// Symbols and subunits must start with a letter and stay ASCII alphanumeric.
fn is_valid_token_name(name: &[u8]) -> bool {
    match name.first() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.iter().all(u8::is_ascii_alphanumeric)
}

#[frame_support::pallet]
pub mod pallet {
    use super::*;

    pub type MomentOf<T> = <<T as Config>::TimeProvider as Time>::Moment;
    pub type TokenDefinitionOf<T> = TokenDefinition<<T as frame_system::Config>::AccountId>;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Balance ledger performing coin movement for this pallet.
        type Ledger: LedgerBackend<Self::AccountId>;

        /// Logical block clock. The pallet never reads wall-clock time.
        type TimeProvider: Time;

        /// Delay between an IBC-enabling upgrade request and its activation.
        /// Read from the parameter store at request time.
        type UpgradeGracePeriod: Get<MomentOf<Self>>;

        /// Absolute deadline after which no v0 token may request an upgrade.
        type UpgradeDecisionTimeout: Get<MomentOf<Self>>;
    }

    #[pallet::pallet]
    #[pallet::storage_version(STORAGE_VERSION)]
    pub struct Pallet<T>(_);

    /// Definitions of all managed tokens, keyed by denom.
    #[pallet::storage]
    pub type Tokens<T: Config> = StorageMap<_, Blake2_128Concat, DenomOf, TokenDefinitionOf<T>>;

    /// Symbols already used per issuer, to reject duplicates at issuance.
    #[pallet::storage]
    pub type IssuedSymbols<T: Config> =
        StorageDoubleMap<_, Blake2_128Concat, T::AccountId, Blake2_128Concat, TokenSymbolOf, ()>;

    /// Amount of a token reserved as frozen on an account. Frozen funds count
    /// against the account's spendable balance but are not moved.
    #[pallet::storage]
    #[pallet::getter(fn frozen_balance)]
    pub type FrozenBalances<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        T::AccountId,
        Blake2_128Concat,
        DenomOf,
        u128,
        ValueQuery,
    >;

    /// Maximum balance an account may hold of a whitelisting-enabled token.
    #[pallet::storage]
    #[pallet::getter(fn whitelisted_limit)]
    pub type WhitelistedLimits<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        T::AccountId,
        Blake2_128Concat,
        DenomOf,
        u128,
        ValueQuery,
    >;

    /// Tokens frozen for every holder except the issuer.
    #[pallet::storage]
    #[pallet::getter(fn is_globally_frozen)]
    pub type GloballyFrozen<T: Config> =
        StorageMap<_, Blake2_128Concat, DenomOf, bool, ValueQuery>;

    /// Outstanding delayed upgrades, at most one per token. Consulted on
    /// every read of the token's effective state and deleted once applied.
    #[pallet::storage]
    #[pallet::getter(fn pending_upgrade)]
    pub type PendingUpgrades<T: Config> =
        StorageMap<_, Blake2_128Concat, DenomOf, TokenUpgradeStatus<MomentOf<T>>>;

    /// Permanent record of the upgrade decision made for a token.
    #[pallet::storage]
    #[pallet::getter(fn upgrade_status)]
    pub type UpgradeStatuses<T: Config> =
        StorageMap<_, Blake2_128Concat, DenomOf, TokenUpgradeStatus<MomentOf<T>>>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// A new token was registered and its initial amount minted.
        TokenIssued { denom: DenomOf, issuer: T::AccountId },
        /// An IBC-enabling upgrade was scheduled; it activates at `end_time`.
        TokenUpgradePending { denom: DenomOf, end_time: MomentOf<T> },
        /// The token reached version 1.
        TokenUpgraded { denom: DenomOf, ibc_enabled: bool },
        /// Part of an account's balance was reserved as frozen.
        Frozen { denom: DenomOf, account: T::AccountId, amount: u128 },
        /// Part of an account's frozen reservation was released.
        Unfrozen { denom: DenomOf, account: T::AccountId, amount: u128 },
        /// The token was frozen for all holders except the issuer.
        GloballyFrozenSet { denom: DenomOf },
        /// The global freeze was lifted.
        GloballyFrozenUnset { denom: DenomOf },
        /// An account's whitelisted holding limit was changed.
        WhitelistedLimitChanged { denom: DenomOf, account: T::AccountId, limit: u128 },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// The denom does not resolve to a managed token.
        TokenNotFound,
        /// A token with the same denom already exists.
        TokenAlreadyExists,
        /// The issuer already used this symbol for another token.
        SymbolAlreadyTaken,
        /// Malformed symbol, subunit or target account.
        InvalidInput,
        /// A feature code outside the known range was supplied.
        UnknownFeature,
        /// The same feature was supplied more than once.
        DuplicatedFeature,
        /// The operation requires a feature the token was issued without.
        FeatureDisabled,
        /// The sender is not the token issuer.
        Unauthorized,
        /// The token is already at version 1.
        AlreadyUpgraded,
        /// An upgrade request is already pending for the token.
        UpgradeAlreadyPending,
        /// The global upgrade decision timeout has passed.
        UpgradeWindowClosed,
        /// The token is globally frozen for non-issuer accounts.
        GloballyFrozen,
        /// The unfrozen part of the balance does not cover the amount.
        InsufficientUnfrozenBalance,
        /// The frozen reservation does not cover the amount to release.
        InsufficientFrozenBalance,
        /// Receiving the amount would exceed the whitelisted limit.
        WhitelistedLimitExceeded,
        /// Arithmetic overflow.
        Overflow,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Registers a new token and mints its initial amount to the issuer.
        ///
        /// `features` is a list of raw feature codes; unknown or duplicated
        /// codes are rejected. A token issued with the `Ibc` feature is born
        /// at version 1, everything else starts at version 0 and may be
        /// upgraded until the decision timeout.
        #[pallet::call_index(0)]
        #[pallet::weight(10_000)]
        pub fn issue(
            origin: OriginFor<T>,
            symbol: TokenSymbolOf,
            subunit: TokenSymbolOf,
            precision: u8,
            initial_amount: u128,
            features: BoundedVec<u8, ConstU32<8>>,
            burn_rate: Permill,
            send_commission_rate: Permill,
        ) -> DispatchResult {
            let issuer = ensure_signed(origin)?;
            ensure!(is_valid_token_name(&symbol), Error::<T>::InvalidInput);
            ensure!(is_valid_token_name(&subunit), Error::<T>::InvalidInput);

            let mut parsed: BoundedVec<Feature, ConstU32<MAX_FEATURES>> = BoundedVec::default();
            for code in &features {
                let feature = Feature::from_code(*code).ok_or(Error::<T>::UnknownFeature)?;
                ensure!(!parsed.contains(&feature), Error::<T>::DuplicatedFeature);
                parsed.try_push(feature).map_err(|_| Error::<T>::InvalidInput)?;
            }

            let denom = Self::build_denom(&subunit, &issuer)?;
            ensure!(!Tokens::<T>::contains_key(&denom), Error::<T>::TokenAlreadyExists);
            ensure!(
                !IssuedSymbols::<T>::contains_key(&issuer, &symbol),
                Error::<T>::SymbolAlreadyTaken
            );

            let version = if parsed.contains(&Feature::Ibc) {
                TOKEN_VERSION_V1
            } else {
                TOKEN_VERSION_V0
            };
            let definition = TokenDefinition {
                denom: denom.clone(),
                issuer: issuer.clone(),
                symbol: symbol.clone(),
                subunit,
                precision,
                burn_rate,
                send_commission_rate,
                features: parsed,
                version,
            };
            Tokens::<T>::insert(&denom, &definition);
            IssuedSymbols::<T>::insert(&issuer, &symbol, ());

            if initial_amount > 0 {
                T::Ledger::mint(&issuer, &denom, initial_amount)?;
            }

            Self::deposit_event(Event::TokenIssued { denom, issuer });
            Ok(())
        }

        /// Requests the v0 -> v1 upgrade of a token.
        ///
        /// With `ibc_enabled = false` the upgrade applies immediately and the
        /// IBC feature stays permanently absent. With `ibc_enabled = true` a
        /// pending record is stored and the token flips once the grace period
        /// elapses, observed lazily on the next read of its state.
        #[pallet::call_index(1)]
        #[pallet::weight(10_000)]
        pub fn request_upgrade(
            origin: OriginFor<T>,
            denom: DenomOf,
            ibc_enabled: bool,
        ) -> DispatchResult {
            let sender = ensure_signed(origin)?;
            let mut definition = Self::definition(&denom)?;

            // State checks come first: a pending or upgraded token rejects
            // requests from anyone, including the issuer.
            ensure!(definition.version == TOKEN_VERSION_V0, Error::<T>::AlreadyUpgraded);
            ensure!(
                !PendingUpgrades::<T>::contains_key(&denom),
                Error::<T>::UpgradeAlreadyPending
            );
            ensure!(definition.is_issuer(&sender), Error::<T>::Unauthorized);

            let now = T::TimeProvider::now();
            ensure!(now < T::UpgradeDecisionTimeout::get(), Error::<T>::UpgradeWindowClosed);

            if ibc_enabled {
                let end_time = now.saturating_add(T::UpgradeGracePeriod::get());
                let status =
                    TokenUpgradeStatus { ibc_enabled: true, start_time: now, end_time };
                PendingUpgrades::<T>::insert(&denom, &status);
                UpgradeStatuses::<T>::insert(&denom, &status);
                Self::deposit_event(Event::TokenUpgradePending { denom, end_time });
            } else {
                definition.version = TOKEN_VERSION_V1;
                Tokens::<T>::insert(&denom, &definition);
                let status =
                    TokenUpgradeStatus { ibc_enabled: false, start_time: now, end_time: now };
                UpgradeStatuses::<T>::insert(&denom, &status);
                Self::deposit_event(Event::TokenUpgraded { denom, ibc_enabled: false });
            }
            Ok(())
        }

        /// Reserves `amount` of `account`'s balance as frozen. Issuer only;
        /// requires the `Freezing` feature. The issuer's own account cannot
        /// be frozen.
        #[pallet::call_index(2)]
        #[pallet::weight(10_000)]
        pub fn freeze(
            origin: OriginFor<T>,
            denom: DenomOf,
            account: T::AccountId,
            amount: u128,
        ) -> DispatchResult {
            let sender = ensure_signed(origin)?;
            let definition = Self::definition(&denom)?;
            ensure!(
                definition.is_feature_enabled(Feature::Freezing),
                Error::<T>::FeatureDisabled
            );
            ensure!(definition.is_issuer(&sender), Error::<T>::Unauthorized);
            ensure!(!definition.is_issuer(&account), Error::<T>::InvalidInput);

            FrozenBalances::<T>::try_mutate(&account, &denom, |frozen| -> DispatchResult {
                *frozen = frozen.checked_add(amount).ok_or(Error::<T>::Overflow)?;
                Ok(())
            })?;
            Self::deposit_event(Event::Frozen { denom, account, amount });
            Ok(())
        }

        /// Releases `amount` of `account`'s frozen reservation.
        #[pallet::call_index(3)]
        #[pallet::weight(10_000)]
        pub fn unfreeze(
            origin: OriginFor<T>,
            denom: DenomOf,
            account: T::AccountId,
            amount: u128,
        ) -> DispatchResult {
            let sender = ensure_signed(origin)?;
            let definition = Self::definition(&denom)?;
            ensure!(
                definition.is_feature_enabled(Feature::Freezing),
                Error::<T>::FeatureDisabled
            );
            ensure!(definition.is_issuer(&sender), Error::<T>::Unauthorized);

            FrozenBalances::<T>::try_mutate(&account, &denom, |frozen| -> DispatchResult {
                *frozen = frozen
                    .checked_sub(amount)
                    .ok_or(Error::<T>::InsufficientFrozenBalance)?;
                Ok(())
            })?;
            Self::deposit_event(Event::Unfrozen { denom, account, amount });
            Ok(())
        }

        /// Freezes the token for every holder except the issuer.
        #[pallet::call_index(4)]
        #[pallet::weight(10_000)]
        pub fn globally_freeze(origin: OriginFor<T>, denom: DenomOf) -> DispatchResult {
            let sender = ensure_signed(origin)?;
            let definition = Self::definition(&denom)?;
            ensure!(
                definition.is_feature_enabled(Feature::Freezing),
                Error::<T>::FeatureDisabled
            );
            ensure!(definition.is_issuer(&sender), Error::<T>::Unauthorized);

            GloballyFrozen::<T>::insert(&denom, true);
            Self::deposit_event(Event::GloballyFrozenSet { denom });
            Ok(())
        }

        /// Lifts a global freeze.
        #[pallet::call_index(5)]
        #[pallet::weight(10_000)]
        pub fn globally_unfreeze(origin: OriginFor<T>, denom: DenomOf) -> DispatchResult {
            let sender = ensure_signed(origin)?;
            let definition = Self::definition(&denom)?;
            ensure!(
                definition.is_feature_enabled(Feature::Freezing),
                Error::<T>::FeatureDisabled
            );
            ensure!(definition.is_issuer(&sender), Error::<T>::Unauthorized);

            GloballyFrozen::<T>::remove(&denom);
            Self::deposit_event(Event::GloballyFrozenUnset { denom });
            Ok(())
        }

        /// Sets the maximum balance `account` may hold of a
        /// whitelisting-enabled token. The issuer itself is never limited.
        #[pallet::call_index(6)]
        #[pallet::weight(10_000)]
        pub fn set_whitelisted_limit(
            origin: OriginFor<T>,
            denom: DenomOf,
            account: T::AccountId,
            limit: u128,
        ) -> DispatchResult {
            let sender = ensure_signed(origin)?;
            let definition = Self::definition(&denom)?;
            ensure!(
                definition.is_feature_enabled(Feature::Whitelisting),
                Error::<T>::FeatureDisabled
            );
            ensure!(definition.is_issuer(&sender), Error::<T>::Unauthorized);
            ensure!(!definition.is_issuer(&account), Error::<T>::InvalidInput);

            WhitelistedLimits::<T>::insert(&account, &denom, limit);
            Self::deposit_event(Event::WhitelistedLimitChanged { denom, account, limit });
            Ok(())
        }
    }

    impl<T: Config> Pallet<T> {
        /// Derives the token identifier from its subunit and issuer.
        pub fn build_denom(
            subunit: &[u8],
            issuer: &T::AccountId,
        ) -> Result<DenomOf, Error<T>> {
            const HEX: &[u8; 16] = b"0123456789abcdef";
            let encoded = issuer.encode();
            let mut out = Vec::with_capacity(subunit.len() + 1 + encoded.len() * 2);
            out.extend(subunit.iter().map(u8::to_ascii_lowercase));
            out.push(b'-');
            for byte in encoded {
                out.push(HEX[(byte >> 4) as usize]);
                out.push(HEX[(byte & 0x0f) as usize]);
            }
            out.try_into().map_err(|_| Error::<T>::InvalidInput)
        }

        /// Effective definition of a token: resolves the denom and applies a
        /// due pending upgrade before returning. Every read/write path of a
        /// token's state goes through here, which is what makes the delayed
        /// upgrade a lazily observed predicate instead of a scheduled task.
        pub fn definition(denom: &DenomOf) -> Result<TokenDefinitionOf<T>, Error<T>> {
            let mut definition = Tokens::<T>::get(denom).ok_or(Error::<T>::TokenNotFound)?;
            Self::apply_pending_upgrade_if_due(denom, &mut definition);
            Ok(definition)
        }

        /// Query: the token definition, reflecting lazily-applied upgrades.
        pub fn token(denom: &DenomOf) -> Option<TokenDefinitionOf<T>> {
            Self::definition(denom).ok()
        }

        /// A pending upgrade activates once the logical clock reaches its
        /// stored end time. Pure; the caller supplies `now`.
        pub fn upgrade_due(status: &TokenUpgradeStatus<MomentOf<T>>, now: &MomentOf<T>) -> bool {
            *now >= status.end_time
        }

        fn apply_pending_upgrade_if_due(denom: &DenomOf, definition: &mut TokenDefinitionOf<T>) {
            let Some(pending) = PendingUpgrades::<T>::get(denom) else {
                return;
            };
            if !Self::upgrade_due(&pending, &T::TimeProvider::now()) {
                return;
            }
            definition.version = TOKEN_VERSION_V1;
            if pending.ibc_enabled && !definition.features.contains(&Feature::Ibc) {
                // Cannot fail: Ibc is absent, so at most MAX_FEATURES - 1
                // features are present.
                let _ = definition.features.try_push(Feature::Ibc);
            }
            Tokens::<T>::insert(denom, &*definition);
            PendingUpgrades::<T>::remove(denom);
            log::debug!(target: LOG_TARGET, "applied pending v1 upgrade for token");
            Self::deposit_event(Event::TokenUpgraded {
                denom: denom.clone(),
                ibc_enabled: pending.ibc_enabled,
            });
        }

        /// Pre-transfer hook for the common two-party transfer.
        pub fn before_send(
            from: &T::AccountId,
            to: &T::AccountId,
            coins: Vec<(Vec<u8>, u128)>,
            purpose: TransferPurpose,
        ) -> DispatchResult {
            let inputs = [SendLeg { account: from.clone(), coins: coins.clone() }];
            let outputs = [SendLeg { account: to.clone(), coins }];
            Self::before_transfer(&inputs, &outputs, purpose)
        }

        /// Pre-transfer hook invoked by the ledger before a multi-party
        /// transfer commits. Charges burn and commission shares and validates
        /// every debit and credit; the first error aborts the whole batch so
        /// the ledger rolls the transfer back atomically.
        ///
        /// Tokens that do not resolve to a managed definition pass through
        /// untouched.
        pub fn before_transfer(
            inputs: &[SendLeg<T::AccountId>],
            outputs: &[SendLeg<T::AccountId>],
            purpose: TransferPurpose,
        ) -> DispatchResult {
            let grouped_inputs = group_by_denom(inputs);
            let grouped_outputs = group_by_denom(outputs);

            try_for_each_deterministic(&grouped_inputs, |denom, in_ops| {
                let denom: DenomOf = match denom.clone().try_into() {
                    Ok(denom) => denom,
                    Err(_) => return Ok(()),
                };
                let definition = match Self::definition(&denom) {
                    Ok(definition) => definition,
                    Err(_) => return Ok(()),
                };

                let empty = AccountOperationMap::new();
                let out_ops = grouped_outputs
                    .get(definition.denom.as_slice())
                    .unwrap_or(&empty);

                let burn_shares = Self::calculate_rate_shares(
                    definition.burn_rate,
                    &definition.issuer,
                    in_ops,
                    out_ops,
                    purpose,
                );
                try_for_each_deterministic(&burn_shares, |account, amount| {
                    Self::ensure_spendable(account, &definition, *amount)?;
                    T::Ledger::burn(account, definition.denom.as_slice(), *amount)
                })?;

                let commission_shares = Self::calculate_rate_shares(
                    definition.send_commission_rate,
                    &definition.issuer,
                    in_ops,
                    out_ops,
                    purpose,
                );
                try_for_each_deterministic(&commission_shares, |account, amount| {
                    T::Ledger::transfer(
                        account,
                        &definition.issuer,
                        definition.denom.as_slice(),
                        *amount,
                    )
                })?;

                try_for_each_deterministic(in_ops, |account, amount| {
                    Self::ensure_spendable(account, &definition, *amount)
                })?;

                try_for_each_deterministic(out_ops, |account, amount| {
                    Self::ensure_receivable(account, &definition, *amount)
                })
            })
        }

        /// Splits the burn or commission amount between all non-issuer
        /// senders, proportionally to what each sent.
        ///
        /// The chargeable base is `min(non-issuer inputs, non-issuer
        /// outputs)`: transfers to or from the issuer carry no rates, so with
        /// the issuer inside a batch the original rate cannot be applied
        /// verbatim. Each sender pays
        /// `ceil(rate * base * amount / non_issuer_input_sum)` with the
        /// integer products formed first and a single ceiling division last,
        /// biasing rounding against under-charging.
        pub fn calculate_rate_shares(
            rate: Permill,
            issuer: &T::AccountId,
            in_ops: &AccountOperationMap<T::AccountId>,
            out_ops: &AccountOperationMap<T::AccountId>,
            purpose: TransferPurpose,
        ) -> AccountOperationMap<T::AccountId> {
            // Incoming IBC transfers and rollbacks (negative ack, timeout)
            // are paid by an escrow account and must never be charged.
            if purpose != TransferPurpose::Regular {
                return AccountOperationMap::new();
            }
            if rate.is_zero() {
                return AccountOperationMap::new();
            }

            let input_sum = non_issuer_sum(in_ops, issuer);
            let output_sum = non_issuer_sum(out_ops, issuer);
            let base = input_sum.min(output_sum);
            if base == 0 {
                return AccountOperationMap::new();
            }

            let mut shares = AccountOperationMap::new();
            for (account, amount) in in_ops {
                if account == issuer || *amount == 0 {
                    continue;
                }
                let numerator =
                    U256::from(rate.deconstruct()) * U256::from(base) * U256::from(*amount);
                let denominator = U256::from(Permill::ACCURACY) * U256::from(input_sum);
                // share <= amount, so the narrowing cannot overflow.
                let share =
                    ((numerator + denominator - U256::one()) / denominator).as_u128();
                shares.insert(account.clone(), share);
            }
            shares
        }

        /// Debit-side guard. The issuer is exempt for its own token.
        fn ensure_spendable(
            account: &T::AccountId,
            definition: &TokenDefinitionOf<T>,
            amount: u128,
        ) -> DispatchResult {
            if definition.is_issuer(account) {
                return Ok(());
            }
            ensure!(
                !Self::is_globally_frozen(&definition.denom),
                Error::<T>::GloballyFrozen
            );
            let balance = T::Ledger::balance(account, definition.denom.as_slice());
            let frozen = Self::frozen_balance(account, &definition.denom);
            let available = balance.saturating_sub(frozen);
            ensure!(available >= amount, Error::<T>::InsufficientUnfrozenBalance);
            Ok(())
        }

        /// Credit-side guard. Only enforced for whitelisting-enabled tokens
        /// and never against the issuer.
        fn ensure_receivable(
            account: &T::AccountId,
            definition: &TokenDefinitionOf<T>,
            amount: u128,
        ) -> DispatchResult {
            if !definition.is_feature_enabled(Feature::Whitelisting)
                || definition.is_issuer(account)
            {
                return Ok(());
            }
            let limit = Self::whitelisted_limit(account, &definition.denom);
            let balance = T::Ledger::balance(account, definition.denom.as_slice());
            let projected = balance.checked_add(amount).ok_or(Error::<T>::Overflow)?;
            ensure!(projected <= limit, Error::<T>::WhitelistedLimitExceeded);
            Ok(())
        }
    }
}

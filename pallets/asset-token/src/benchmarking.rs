//! Benchmarking setup for pallet-asset-token

use super::*;

#[allow(unused)]
use crate::Pallet as AssetToken;
use frame_benchmarking::v2::*;
use frame_system::RawOrigin;

fn setup_token<T: Config>(issuer: &T::AccountId, features: &[Feature]) -> DenomOf {
    let denom = Pallet::<T>::build_denom(b"utok", issuer).expect("denom fits the bound");
    let definition = TokenDefinition {
        denom: denom.clone(),
        issuer: issuer.clone(),
        symbol: b"TOK".to_vec().try_into().expect("symbol fits the bound"),
        subunit: b"utok".to_vec().try_into().expect("subunit fits the bound"),
        precision: 6,
        burn_rate: Permill::zero(),
        send_commission_rate: Permill::zero(),
        features: features.to_vec().try_into().expect("features fit the bound"),
        version: TOKEN_VERSION_V0,
    };
    Tokens::<T>::insert(&denom, &definition);
    denom
}

#[benchmarks]
mod benchmarks {
    use super::*;

    #[benchmark]
    fn issue() {
        let caller: T::AccountId = whitelisted_caller();
        let symbol: TokenSymbolOf = b"TOK".to_vec().try_into().expect("symbol fits the bound");
        let subunit: TokenSymbolOf = b"utok".to_vec().try_into().expect("subunit fits the bound");
        let features: BoundedVec<u8, ConstU32<8>> =
            [Feature::Freezing as u8, Feature::Whitelisting as u8]
                .to_vec()
                .try_into()
                .expect("features fit the bound");

        #[extrinsic_call]
        _(
            RawOrigin::Signed(caller.clone()),
            symbol,
            subunit,
            6,
            0u128,
            features,
            Permill::from_percent(1),
            Permill::from_percent(1),
        );

        let denom = Pallet::<T>::build_denom(b"utok", &caller).expect("denom fits the bound");
        assert!(Tokens::<T>::contains_key(&denom));
    }

    #[benchmark]
    fn request_upgrade() {
        let caller: T::AccountId = whitelisted_caller();
        let denom = setup_token::<T>(&caller, &[]);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller), denom.clone(), true);

        assert!(PendingUpgrades::<T>::contains_key(&denom));
    }

    #[benchmark]
    fn freeze() {
        let caller: T::AccountId = whitelisted_caller();
        let target: T::AccountId = account("target", 0, 0);
        let denom = setup_token::<T>(&caller, &[Feature::Freezing]);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller), denom.clone(), target.clone(), 1_000u128);

        assert_eq!(FrozenBalances::<T>::get(&target, &denom), 1_000);
    }

    #[benchmark]
    fn unfreeze() {
        let caller: T::AccountId = whitelisted_caller();
        let target: T::AccountId = account("target", 0, 0);
        let denom = setup_token::<T>(&caller, &[Feature::Freezing]);
        FrozenBalances::<T>::insert(&target, &denom, 1_000u128);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller), denom.clone(), target.clone(), 1_000u128);

        assert_eq!(FrozenBalances::<T>::get(&target, &denom), 0);
    }

    #[benchmark]
    fn globally_freeze() {
        let caller: T::AccountId = whitelisted_caller();
        let denom = setup_token::<T>(&caller, &[Feature::Freezing]);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller), denom.clone());

        assert!(GloballyFrozen::<T>::get(&denom));
    }

    #[benchmark]
    fn globally_unfreeze() {
        let caller: T::AccountId = whitelisted_caller();
        let denom = setup_token::<T>(&caller, &[Feature::Freezing]);
        GloballyFrozen::<T>::insert(&denom, true);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller), denom.clone());

        assert!(!GloballyFrozen::<T>::get(&denom));
    }

    #[benchmark]
    fn set_whitelisted_limit() {
        let caller: T::AccountId = whitelisted_caller();
        let target: T::AccountId = account("target", 0, 0);
        let denom = setup_token::<T>(&caller, &[Feature::Whitelisting]);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller), denom.clone(), target.clone(), 1_000u128);

        assert_eq!(WhitelistedLimits::<T>::get(&target, &denom), 1_000);
    }

    impl_benchmark_test_suite!(AssetToken, crate::mock::new_test_ext(), crate::mock::Test);
}

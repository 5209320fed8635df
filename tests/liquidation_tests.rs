use helper::Helper;
use trove_engine::shared_structs::*;

use scrypto_test::prelude::*;

/// Trove 1: 1000 XRD against 512.5 debt. Trove 2: 10000 XRD against 1015 debt.
fn setup_two_troves(helper: &mut Helper) -> Result<(Bucket, Bucket), RuntimeError> {
    let (stable_1, _receipt_1) = helper.open_trove(dec!(1000), dec!(500))?;
    let (stable_2, _receipt_2) = helper.open_trove(dec!(10000), dec!(1000))?;

    Ok((stable_1, stable_2))
}

#[test]
fn test_liquidate_by_redistribution() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;

    // Trove 1 drops to an ICR of 500 / 512.5, the system stays out of recovery mode
    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    assert!(!helper.trove_manager.check_recovery_mode(&mut helper.env)?);

    let (coll_compensation, stable_compensation) = helper.liquidate(1)?;

    assert_eq!(coll_compensation.len(), 1);
    helper.assert_bucket_eq(&coll_compensation[0], helper.xrd_address, dec!(5))?;
    helper.assert_bucket_eq(&stable_compensation, helper.stable_address, dec!(10))?;

    let info = helper.trove_info(1)?;
    assert_eq!(info.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(info.debt, Decimal::ZERO);

    // The stability pool is empty, so trove 2 inherits everything but the gas compensation
    let (debt, collaterals, pending_debt, pending_collaterals) = helper
        .trove_manager
        .get_entire_debt_and_coll(NonFungibleLocalId::from(2), &mut helper.env)?;
    assert_eq!(pending_debt, dec!("512.5"));
    assert_eq!(pending_collaterals, vec![(helper.xrd_address, dec!(995))]);
    assert_eq!(debt, dec!("1527.5"));
    assert_eq!(collaterals, vec![(helper.xrd_address, dec!(10995))]);

    let system = helper.system_info()?;
    assert_eq!(system.active_debt, dec!(1015));
    assert_eq!(system.default_debt, dec!("512.5"));
    assert_eq!(system.trove_owners_count, 1);
    assert_eq!(system.gas_reserve, dec!(10));

    let collateral_info = &helper.trove_manager.get_collateral_infos(&mut helper.env)?[0];
    assert_eq!(collateral_info.default_amount, dec!(995));
    assert_eq!(collateral_info.total_stakes, dec!(10000));
    assert_eq!(collateral_info.total_stakes_snapshot, dec!(10000));
    assert_eq!(collateral_info.total_collateral_snapshot, dec!(10995));

    Ok(())
}

#[test]
fn test_pending_rewards_applied_on_touch() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (_stable_1, _stable_2) = setup_two_troves(&mut helper)?;
    let (_stable_3, receipt_3) = helper.open_trove(dec!(10000), dec!(1000))?;

    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    helper.liquidate(1)?;

    // Equal stakes, equal shares
    let info = helper.trove_info(3)?;
    assert_eq!(info.pending_debt, dec!("256.25"));
    assert_eq!(info.pending_collaterals, vec![(helper.xrd_address, dec!("497.5"))]);

    helper.set_price(helper.xrd_address, dec!(1))?;
    let proof = helper.proof(&receipt_3)?;
    let xrd = helper.xrd.take(dec!(5), &mut helper.env)?;
    helper
        .trove_manager
        .add_collateral(proof, vec![xrd], None, None, &mut helper.env)?;

    let info = helper.trove_info(3)?;
    assert_eq!(info.pending_debt, Decimal::ZERO);
    assert_eq!(info.debt, dec!("1271.25"));
    assert_eq!(info.collaterals, vec![(helper.xrd_address, dec!("10502.5"))]);
    assert_eq!(helper.trove_manager.get_trove_debt(NonFungibleLocalId::from(3), &mut helper.env)?, dec!("1271.25"));

    // New stake is taken against the snapshot of the last liquidation: 10502.5 * 20000 / 20995
    let stake = helper.trove_manager.get_trove_stake(
        NonFungibleLocalId::from(3),
        helper.xrd_address,
        &mut helper.env,
    )?;
    assert_eq!(stake, dec!("10502.5") * dec!(20000) / dec!(20995));

    Ok(())
}

#[test]
fn test_liquidate_with_stability_pool() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (_stable_1, stable_2) = setup_two_troves(&mut helper)?;

    let pool_units = helper.deposit_to_stability_pool(stable_2)?;
    assert_eq!(pool_units.amount(&mut helper.env)?, dec!(1000));

    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    helper.liquidate(1)?;

    // The pool absorbs the whole debt and takes the collateral net of gas compensation
    let pool_info = helper.stability_pool.get_pool_info(&mut helper.env)?;
    assert_eq!(pool_info.stable_amount, dec!("487.5"));
    assert_eq!(pool_info.collaterals, vec![(helper.xrd_address, dec!(995))]);

    let info = helper.trove_info(2)?;
    assert_eq!(info.pending_debt, Decimal::ZERO);

    let system = helper.system_info()?;
    assert_eq!(system.active_debt, dec!(1015));
    assert_eq!(system.default_debt, Decimal::ZERO);
    assert_eq!(system.circulating_stable, dec!(1015));

    let (stable, collaterals) = helper
        .stability_pool
        .withdraw(pool_units, &mut helper.env)?;
    helper.assert_bucket_eq(&stable, helper.stable_address, dec!("487.5"))?;
    helper.assert_bucket_eq(&collaterals[0], helper.xrd_address, dec!(995))?;

    Ok(())
}

#[test]
fn test_liquidate_partially_offset() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable_1, _stable_2) = setup_two_troves(&mut helper)?;

    // 250 of the 512.5 debt can be offset
    let deposit = stable_1.take(dec!(250), &mut helper.env)?;
    helper.deposit_to_stability_pool(deposit)?;

    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    helper.liquidate(1)?;

    let pool_info = helper.stability_pool.get_pool_info(&mut helper.env)?;
    assert_eq!(pool_info.stable_amount, Decimal::ZERO);
    assert_eq!(
        pool_info.collaterals,
        vec![(helper.xrd_address, dec!(995) * (dec!(250) / dec!("512.5")))]
    );

    let info = helper.trove_info(2)?;
    assert_eq!(info.pending_debt, dec!("262.5"));

    Ok(())
}

#[test]
fn test_liquidate_healthy_trove() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;

    let result = helper.liquidate(1);
    assert!(result.is_err(), "A trove above the MCR cannot be liquidated");

    Ok(())
}

#[test]
fn test_liquidate_closed_trove() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;

    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    helper.liquidate(1)?;

    let result = helper.liquidate(1);
    assert!(result.is_err(), "A closed trove cannot be liquidated again");

    Ok(())
}

#[test]
fn test_liquidate_last_trove() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.open_trove(dec!(1000), dec!(500))?;

    helper.set_price(helper.xrd_address, dec!("0.5"))?;

    let result = helper.liquidate(1);
    assert!(result.is_err(), "The last trove cannot be liquidated");

    Ok(())
}

#[test]
fn test_batch_liquidate_skips_healthy_troves() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;
    helper.open_trove(dec!(1000), dec!(500))?;

    helper.set_price(helper.xrd_address, dec!("0.5"))?;

    let (coll_compensation, stable_compensation) = helper.trove_manager.batch_liquidate(
        vec![
            NonFungibleLocalId::from(1),
            NonFungibleLocalId::from(2),
            NonFungibleLocalId::from(3),
            NonFungibleLocalId::from(99),
        ],
        &mut helper.env,
    )?;

    helper.assert_bucket_eq(&coll_compensation[0], helper.xrd_address, dec!(10))?;
    helper.assert_bucket_eq(&stable_compensation, helper.stable_address, dec!(20))?;

    assert_eq!(helper.trove_info(1)?.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.trove_info(2)?.status, TroveStatus::Active);
    assert_eq!(helper.trove_info(3)?.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.trove_info(2)?.pending_debt, dec!(1025));

    Ok(())
}

#[test]
fn test_batch_liquidate_nothing_to_liquidate() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;

    let tcr_before = helper.trove_manager.get_tcr(&mut helper.env)?;
    let sorted_size_before = helper.system_info()?.sorted_troves_size;

    let result = helper.trove_manager.batch_liquidate(
        vec![NonFungibleLocalId::from(1), NonFungibleLocalId::from(2)],
        &mut helper.env,
    );
    assert!(result.is_err(), "Nothing in the batch can be liquidated");

    assert_eq!(helper.trove_manager.get_tcr(&mut helper.env)?, tcr_before);
    assert_eq!(helper.system_info()?.sorted_troves_size, sorted_size_before);
    assert_eq!(sorted_size_before, 2);

    Ok(())
}

#[test]
fn test_batch_liquidate_empty() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;

    let result = helper.trove_manager.batch_liquidate(vec![], &mut helper.env);
    assert!(result.is_err(), "An empty batch is refused");

    Ok(())
}

#[test]
fn test_liquidations_stopped() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_two_troves(&mut helper)?;
    helper.set_price(helper.xrd_address, dec!("0.5"))?;

    helper.env.disable_auth_module();
    helper
        .trove_manager
        .set_stops(true, false, false, &mut helper.env)?;
    helper.env.enable_auth_module();

    let result = helper.liquidate(1);
    assert!(result.is_err(), "Liquidations are stopped");

    Ok(())
}

/// Trove 1: 500 XRD and 250 LSU against 512.5 debt, under the MCR once XRD drops to 0.5 and LSU to 1.
fn setup_multi_collateral(helper: &mut Helper) -> Result<Bucket, RuntimeError> {
    let xrd = helper.xrd.take(dec!(500), &mut helper.env)?;
    let lsu = helper.lsu.take(dec!(250), &mut helper.env)?;
    helper.open_trove_with(vec![xrd, lsu], dec!(500))?;
    let (stable_2, _receipt_2) = helper.open_trove(dec!(10000), dec!(1000))?;

    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    helper.set_price(helper.lsu_address, dec!(1))?;

    Ok(stable_2)
}

#[test]
fn test_multi_collateral_liquidation_without_holders() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    setup_multi_collateral(&mut helper)?;

    // No other trove holds LSU, so its share cannot be redistributed
    let result = helper.liquidate(1);
    assert!(result.is_err(), "Redistribution of a kind nobody else holds should fail");

    Ok(())
}

#[test]
fn test_multi_collateral_liquidation_with_stability_pool() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let stable_2 = setup_multi_collateral(&mut helper)?;

    // With the stability pool covering the debt, nothing needs to be redistributed
    helper.deposit_to_stability_pool(stable_2)?;
    let (coll_compensation, _) = helper.liquidate(1)?;
    assert_eq!(coll_compensation.len(), 2);

    let pool_info = helper.stability_pool.get_pool_info(&mut helper.env)?;
    assert_eq!(
        pool_info.collaterals,
        vec![
            (helper.xrd_address, dec!("497.5")),
            (helper.lsu_address, dec!("248.75"))
        ]
    );

    Ok(())
}

#[test]
fn test_capped_liquidation_in_recovery_mode() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    let (stable_1, receipt_1) = helper.open_trove(dec!(1000), dec!(500))?;
    let (stable_2, _receipt_2) = helper.open_trove(dec!(1000), dec!(300))?;
    stable_1.put(stable_2, &mut helper.env)?;
    helper.deposit_to_stability_pool(stable_1)?;

    // Trove 1 at 600 / 512.5 sits above the MCR but under the TCR of 1200 / 824
    helper.set_price(helper.xrd_address, dec!("0.6"))?;
    assert!(helper.trove_manager.check_recovery_mode(&mut helper.env)?);

    helper.liquidate(1)?;

    assert_eq!(helper.trove_info(1)?.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.trove_info(2)?.pending_debt, Decimal::ZERO);

    let pool_info = helper.stability_pool.get_pool_info(&mut helper.env)?;
    assert_eq!(pool_info.stable_amount, dec!("287.5"));

    // The collateral above MCR * debt is left to the owner
    let surplus = helper
        .trove_manager
        .get_coll_surplus(NonFungibleLocalId::from(1), &mut helper.env)?;
    assert_eq!(surplus.len(), 1);
    let surplus_amount = surplus[0].1;
    assert!(surplus_amount > dec!(60) && surplus_amount < dec!(61));

    let proof = helper.proof(&receipt_1)?;
    let claimed = helper
        .trove_manager
        .claim_coll_surplus(proof, &mut helper.env)?;
    helper.assert_bucket_eq(&claimed[0], helper.xrd_address, surplus_amount)?;

    let proof = helper.proof(&receipt_1)?;
    let result = helper
        .trove_manager
        .claim_coll_surplus(proof, &mut helper.env);
    assert!(result.is_err(), "Surplus can only be claimed once");

    Ok(())
}

#[test]
fn test_recovery_mode_immunity() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    let (stable_1, _receipt_1) = helper.open_trove(dec!(1000), dec!(500))?;
    let (stable_2, _receipt_2) = helper.open_trove(dec!(1000), dec!(300))?;
    stable_1.put(stable_2, &mut helper.env)?;
    helper.deposit_to_stability_pool(stable_1)?;

    helper.set_price(helper.xrd_address, dec!("0.6"))?;

    // Trove 2 at 600 / 311.5 is above the TCR
    let result = helper.liquidate(2);
    assert!(result.is_err(), "Troves above the TCR are immune in recovery mode");

    Ok(())
}

#[test]
fn test_liquidation_swaps_last_owner_into_freed_slot() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    // Troves 1, 2, 3, 5 and 6 hold 1000 XRD against 110.5 debt, trove 4 against 512.5 debt
    for trove in 1..=6u64 {
        let stable_amount = if trove == 4 { dec!(500) } else { dec!(100) };
        helper.open_trove(dec!(1000), stable_amount)?;
    }

    let ids = |numbers: &[u64]| -> Vec<NonFungibleLocalId> {
        numbers
            .iter()
            .map(|number| NonFungibleLocalId::from(*number))
            .collect()
    };
    assert_eq!(
        helper.trove_manager.get_trove_owners(&mut helper.env)?,
        ids(&[1, 2, 3, 4, 5, 6])
    );

    let stake_before = helper.trove_manager.get_trove_stake(
        NonFungibleLocalId::from(4),
        helper.xrd_address,
        &mut helper.env,
    )?;
    let total_stakes_before = xrd_total_stakes(&mut helper)?;
    assert_eq!(stake_before, dec!(1000));

    helper.set_price(helper.xrd_address, dec!("0.5"))?;
    helper.liquidate(4)?;

    assert_eq!(
        helper.trove_manager.get_trove_owners(&mut helper.env)?,
        ids(&[1, 2, 3, 6, 5])
    );
    assert_eq!(helper.trove_manager.get_trove_owners_count(&mut helper.env)?, 5);
    assert_eq!(helper.trove_info(6)?.array_index, 3);
    assert_eq!(helper.trove_info(5)?.array_index, 4);

    assert!(!helper
        .trove_manager
        .sorted_troves_contains(NonFungibleLocalId::from(4), &mut helper.env)?);
    assert!(helper
        .trove_manager
        .sorted_troves_contains(NonFungibleLocalId::from(6), &mut helper.env)?);

    assert_eq!(xrd_total_stakes(&mut helper)?, total_stakes_before - stake_before);
    assert_eq!(
        helper.trove_manager.get_trove_stake(
            NonFungibleLocalId::from(4),
            helper.xrd_address,
            &mut helper.env,
        )?,
        Decimal::ZERO
    );

    Ok(())
}

fn xrd_total_stakes(helper: &mut Helper) -> Result<Decimal, RuntimeError> {
    let infos = helper.trove_manager.get_collateral_infos(&mut helper.env)?;
    Ok(infos
        .into_iter()
        .find(|info| info.resource_address == helper.xrd_address)
        .map(|info| info.total_stakes)
        .unwrap_or(Decimal::ZERO))
}

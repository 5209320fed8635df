use helper::Helper;
use trove_engine::shared_structs::*;

use scrypto_test::prelude::*;

/// Opens three troves and returns all stable borrowed (700):
/// trove 1: 1000 XRD / 211 debt, trove 2: 1000 XRD / 412 debt, trove 3: 2000 XRD / 110.5 debt.
fn setup_three_troves(helper: &mut Helper) -> Result<(Bucket, Vec<Bucket>), RuntimeError> {
    let (stable, receipt_1) = helper.open_trove(dec!(1000), dec!(200))?;
    let (stable_2, receipt_2) = helper.open_trove(dec!(1000), dec!(400))?;
    let (stable_3, receipt_3) = helper.open_trove(dec!(2000), dec!(100))?;
    stable.put(stable_2, &mut helper.env)?;
    stable.put(stable_3, &mut helper.env)?;

    Ok((stable, vec![receipt_1, receipt_2, receipt_3]))
}

#[test]
fn test_partial_redemption() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    let (collaterals, leftover) = helper.redeem(stable, dec!(100), Decimal::ONE)?;

    helper.assert_bucket_eq(&leftover, helper.stable_address, dec!(600))?;

    // Trove 2 has the lowest ICR and gives up 100 XRD
    let info = helper.trove_info(2)?;
    assert_eq!(info.status, TroveStatus::Active);
    assert_eq!(info.debt, dec!(312));
    assert_eq!(info.collaterals, vec![(helper.xrd_address, dec!(900))]);
    assert_eq!(info.stakes, vec![(helper.xrd_address, dec!(900))]);

    // Fee: floor + 100 / 733.5 * 0.5 of the drawn collateral
    let base_rate = dec!(100) / dec!("733.5") * dec!("0.5");
    let fee = dec!(100) * (dec!("0.005") + base_rate);
    helper.assert_bucket_eq(&collaterals[0], helper.xrd_address, dec!(100) - fee)?;
    assert_eq!(helper.fee_balance(helper.xrd_address)?, fee);

    let system = helper.system_info()?;
    assert_eq!(system.base_rate, base_rate);
    assert_eq!(system.circulating_stable, dec!("633.5"));
    assert_eq!(system.active_debt, dec!("633.5"));

    // The untouched troves keep their debt
    assert_eq!(helper.trove_info(1)?.debt, dec!(211));
    assert_eq!(helper.trove_info(3)?.debt, dec!("110.5"));

    Ok(())
}

#[test]
fn test_full_redemption() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, receipts) = setup_three_troves(&mut helper)?;

    let (collaterals, leftover) = helper.redeem(stable, dec!(402), Decimal::ONE)?;

    helper.assert_bucket_eq(&leftover, helper.stable_address, dec!(298))?;
    let fee = helper.fee_balance(helper.xrd_address)?;
    helper.assert_bucket_eq(&collaterals[0], helper.xrd_address, dec!(402) - fee)?;

    let info = helper.trove_info(2)?;
    assert_eq!(info.status, TroveStatus::ClosedByRedemption);
    assert_eq!(info.debt, Decimal::ZERO);

    // The gas compensation of trove 2 is burned, its leftover collateral is claimable
    let system = helper.system_info()?;
    assert_eq!(system.gas_reserve, dec!(20));
    assert_eq!(system.trove_owners_count, 2);
    assert_eq!(system.circulating_stable, dec!("321.5"));

    let surplus = helper
        .trove_manager
        .get_coll_surplus(NonFungibleLocalId::from(2), &mut helper.env)?;
    assert_eq!(surplus, vec![(helper.xrd_address, dec!(598))]);

    let proof = helper.proof(&receipts[1])?;
    let claimed = helper
        .trove_manager
        .claim_coll_surplus(proof, &mut helper.env)?;
    helper.assert_bucket_eq(&claimed[0], helper.xrd_address, dec!(598))?;

    Ok(())
}

#[test]
fn test_redemption_over_multiple_troves() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    // Trove 2 is emptied (402), then trove 1 gives up 100
    let (_collaterals, leftover) = helper.redeem(stable, dec!(502), Decimal::ONE)?;
    helper.assert_bucket_eq(&leftover, helper.stable_address, dec!(198))?;

    assert_eq!(helper.trove_info(2)?.status, TroveStatus::ClosedByRedemption);
    assert_eq!(helper.trove_info(1)?.debt, dec!(111));
    assert_eq!(helper.trove_info(1)?.collaterals, vec![(helper.xrd_address, dec!(900))]);

    Ok(())
}

#[test]
fn test_redemption_iteration_limit() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    // Only trove 2 is visited, the rest of the amount stays with the redeemer
    let (_collaterals, leftover) = helper.trove_manager.redeem(
        stable,
        dec!(502),
        Decimal::ONE,
        None,
        None,
        None,
        Decimal::ZERO,
        1,
        &mut helper.env,
    )?;
    helper.assert_bucket_eq(&leftover, helper.stable_address, dec!(298))?;
    assert_eq!(helper.trove_info(1)?.debt, dec!(211));

    Ok(())
}

#[test]
fn test_redemption_with_hints() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    // 350 would leave trove 2 under the minimum net debt, so the hint truncates to 312
    let (first_hint, partial_hint_nicr, truncated_amount) = helper
        .trove_manager
        .get_redemption_hints(dec!(350), 0, &mut helper.env)?;
    assert_eq!(first_hint, Some(NonFungibleLocalId::from(2)));
    assert_eq!(truncated_amount, dec!(312));
    assert_eq!(partial_hint_nicr, dec!(688) / dec!(100));

    let (upper_hint, lower_hint) = helper.trove_manager.find_insert_position(
        partial_hint_nicr,
        None,
        None,
        &mut helper.env,
    )?;

    helper.trove_manager.redeem(
        stable,
        truncated_amount,
        Decimal::ONE,
        first_hint,
        upper_hint,
        lower_hint,
        partial_hint_nicr,
        0,
        &mut helper.env,
    )?;

    let info = helper.trove_info(2)?;
    assert_eq!(info.debt, dec!(100));
    // XRD is priced at 1, so the live ICR equals the nominal ratio
    assert_eq!(info.icr, partial_hint_nicr);

    // Trove 2 now sits between trove 3 and trove 1
    let sorted: Vec<NonFungibleLocalId> = helper
        .trove_manager
        .get_sorted_troves(3, &mut helper.env)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(
        sorted,
        vec![
            NonFungibleLocalId::from(3),
            NonFungibleLocalId::from(2),
            NonFungibleLocalId::from(1)
        ]
    );

    Ok(())
}

#[test]
fn test_redemption_cancelled_below_minimum() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    // Trove 2 would be left with 52 net debt, nothing can be redeemed
    let result = helper.redeem(stable, dec!(350), Decimal::ONE);
    assert!(result.is_err(), "A redemption redeeming nothing should fail");

    Ok(())
}

#[test]
fn test_redemption_fee_above_max() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    let result = helper.redeem(stable, dec!(100), dec!("0.01"));
    assert!(result.is_err(), "The fee rate exceeds what the redeemer accepts");

    Ok(())
}

#[test]
fn test_redemption_insufficient_payment() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    let result = helper.redeem(stable, dec!(701), Decimal::ONE);
    assert!(result.is_err(), "Cannot redeem more than was paid in");

    Ok(())
}

#[test]
fn test_redemption_below_mcr_system() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    // TCR = 4000 * 0.2 / 733.5
    helper.set_price(helper.xrd_address, dec!("0.2"))?;

    let result = helper.redeem(stable, dec!(100), Decimal::ONE);
    assert!(result.is_err(), "Redemptions are refused when TCR < MCR");

    Ok(())
}

#[test]
fn test_redemption_skips_troves_below_mcr() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    // Trove 2 at 1000 * 0.45 / 412 falls under the MCR, trove 1 at 450 / 211 does not
    helper.set_price(helper.xrd_address, dec!("0.45"))?;

    helper.redeem(stable, dec!(100), Decimal::ONE)?;

    assert_eq!(helper.trove_info(2)?.debt, dec!(412));
    assert_eq!(helper.trove_info(1)?.debt, dec!(111));

    Ok(())
}

#[test]
fn test_redemption_starts_at_lowest_icr_after_price_drop() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    // Trove 1: 1000 XRD / 412 debt, opened at price 1
    let (stable, _receipt_1) = helper.open_trove(dec!(1000), dec!(400))?;

    // Trove 2 opens at price 0.6, in recovery mode, so without a fee: 1000 XRD / 310 debt
    helper.set_price(helper.xrd_address, dec!("0.6"))?;
    let (_stable_2, _receipt_2) = helper.open_trove(dec!(1000), dec!(300))?;
    assert_eq!(helper.trove_info(2)?.debt, dec!(310));

    // Live ICRs: trove 1 at 600 / 412, trove 2 at 600 / 310
    assert!(helper.trove_info(1)?.icr < helper.trove_info(2)?.icr);
    let sorted: Vec<NonFungibleLocalId> = helper
        .trove_manager
        .get_sorted_troves(2, &mut helper.env)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(
        sorted,
        vec![NonFungibleLocalId::from(2), NonFungibleLocalId::from(1)]
    );

    helper.redeem(stable, dec!(100), Decimal::ONE)?;

    assert_eq!(helper.trove_info(1)?.debt, dec!(312));
    assert_eq!(helper.trove_info(2)?.debt, dec!(310));

    Ok(())
}

#[test]
fn test_base_rate_decay() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    helper.redeem(stable, dec!(100), Decimal::ONE)?;
    let rate_after_redemption = helper
        .trove_manager
        .get_redemption_rate(&mut helper.env)?;
    assert!(rate_after_redemption > dec!("0.005"));

    // Twelve hours is one half-life
    helper.advance_days(1);
    let rate_after_a_day = helper
        .trove_manager
        .get_redemption_rate(&mut helper.env)?;
    assert!(rate_after_a_day < rate_after_redemption);
    assert!(rate_after_a_day > dec!("0.005"));

    let borrowing_rate = helper.trove_manager.get_borrowing_rate(&mut helper.env)?;
    assert!(borrowing_rate <= dec!("0.05"));

    Ok(())
}

#[test]
fn test_redemptions_stopped() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let (stable, _receipts) = setup_three_troves(&mut helper)?;

    helper.env.disable_auth_module();
    helper
        .trove_manager
        .set_stops(false, true, false, &mut helper.env)?;
    helper.env.enable_auth_module();

    let result = helper.redeem(stable, dec!(100), Decimal::ONE);
    assert!(result.is_err(), "Redemptions are stopped");

    Ok(())
}

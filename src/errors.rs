//! Failure reasons reported by the trove engine.
//!
//! Pure modules return `Result<_, TroveError>`. Blueprint methods abort the transaction with the
//! error's reason string, which discards every write made so far.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TroveError {
    // Preconditions
    TroveMustExist,
    TroveNotActive,
    AmountMustBeNonZero,
    InsufficientBalance,
    MaxFeeOutOfBounds,
    TcrBelowMcr,
    UnknownCollateral,
    CollateralNotAccepted,
    DuplicateCollateral,
    InvalidPayment,
    OperationStopped,
    NetDebtBelowMinimum,
    IcrBelowMcr,
    IcrBelowCcr,
    TcrBelowCcr,
    RecoveryModeForbidden,
    CollateralWithdrawalInRecoveryMode,
    IcrDecreaseInRecoveryMode,
    OnlyOneTroveInSystem,
    NoCollSurplus,
    RepaymentExceedsDebt,
    StabilityPoolDepleted,
    // Eligibility
    NothingToLiquidate,
    UnableToRedeem,
    CannotRedistribute,
    // Caller-tunable limits
    FeeExceedsMax,
    FeeExceedsCollateralDrawn,
}

impl fmt::Display for TroveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TroveError::TroveMustExist => "TroveManager: Trove does not exist or is closed",
            TroveError::TroveNotActive => "TroveManager: Trove is not active",
            TroveError::AmountMustBeNonZero => "TroveManager: Amount must be greater than zero",
            TroveError::InsufficientBalance => {
                "TroveManager: Requested amount exceeds the provided balance"
            }
            TroveError::MaxFeeOutOfBounds => {
                "TroveManager: Max fee percentage must be between the fee floor and 100%"
            }
            TroveError::TcrBelowMcr => "TroveManager: Cannot redeem when TCR < MCR",
            TroveError::UnknownCollateral => "TroveManager: Collateral is not registered",
            TroveError::CollateralNotAccepted => "TroveManager: Collateral is not accepted",
            TroveError::DuplicateCollateral => "TroveManager: Collateral kinds must be unique",
            TroveError::InvalidPayment => "TroveManager: Invalid stable payment",
            TroveError::OperationStopped => "TroveManager: Operation is currently stopped",
            TroveError::NetDebtBelowMinimum => {
                "BorrowerOps: Trove's net debt must be greater than minimum"
            }
            TroveError::IcrBelowMcr => {
                "BorrowerOps: An operation that would result in ICR < MCR is not permitted"
            }
            TroveError::IcrBelowCcr => {
                "BorrowerOps: Operation must leave trove with ICR >= CCR"
            }
            TroveError::TcrBelowCcr => {
                "BorrowerOps: An operation that would result in TCR < CCR is not permitted"
            }
            TroveError::RecoveryModeForbidden => {
                "BorrowerOps: Operation not permitted during Recovery Mode"
            }
            TroveError::CollateralWithdrawalInRecoveryMode => {
                "BorrowerOps: Collateral withdrawal not permitted Recovery Mode"
            }
            TroveError::IcrDecreaseInRecoveryMode => {
                "BorrowerOps: Cannot decrease your Trove's ICR in Recovery Mode"
            }
            TroveError::OnlyOneTroveInSystem => "TroveManager: Only one trove in the system",
            TroveError::NoCollSurplus => "CollSurplusPool: No collateral available to claim",
            TroveError::RepaymentExceedsDebt => {
                "BorrowerOps: Amount repaid must not be larger than the Trove's debt"
            }
            TroveError::StabilityPoolDepleted => {
                "StabilityPool: Pool is depleted, deposits are not possible"
            }
            TroveError::NothingToLiquidate => "TroveManager: nothing to liquidate",
            TroveError::UnableToRedeem => "TroveManager: Unable to redeem any amount",
            TroveError::CannotRedistribute => {
                "TroveManager: No remaining stake to redistribute to"
            }
            TroveError::FeeExceedsMax => "Fee exceeded provided maximum",
            TroveError::FeeExceedsCollateralDrawn => {
                "TroveManager: Fee would eat up all returned collateral"
            }
        };
        write!(f, "{}", reason)
    }
}

/// Aborts the running transaction with the error's reason.
pub trait OrAbort<T> {
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, TroveError> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic!("{}", err),
        }
    }
}

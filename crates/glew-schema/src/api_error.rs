use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment failures reported by the vault.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentError {
    #[error("amount below dust limit")]
    DustAmount,
    #[error("illegal destination address")]
    IllegalAddress,
    #[error("illegal cost rate")]
    IllegalCostRate,
    #[error("not enough funds, transaction cost {0}")]
    NotEnoughFunds(u64),
    #[error("transaction cost greater than funds")]
    TransactionCostGreaterThanFunds,
    #[error("payment failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyChainError {
    #[error("user cancelled or failed authentication")]
    UserCancelledOrFailedAuthentication,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("key not found")]
    NotFound,
}

/// Failure categories that reach the user-facing layer.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletApiError {
    #[error("Network unavailable, please try again")]
    Unavailable,
    #[error("Payment amount is too low and below the minimum allowable limit of the Bitcoin network")]
    Dust,
    #[error("Cannot fetch current Bitcoin network fees")]
    FeeRateNil,
    #[error("Payment request failed to an illegal destination address")]
    IllegalAddress,
    #[error("Internal error: Payment requested with an illegal nil transaction cost")]
    IllegalCostRate,
    #[error("Internal error")]
    InternalError,
    #[error("Payment amount and transaction cost exceed available funds")]
    NotEnoughFunds(u64),
    #[error("Payment cannot proceed due to total transaction costs exceeding available coins.")]
    TxCostEclipse,
    #[error("Authentication was cancelled")]
    Cancel,
}

impl WalletApiError {
    pub fn tx_cost(&self) -> Option<u64> {
        match self {
            WalletApiError::NotEnoughFunds(cost) => Some(*cost),
            _ => None,
        }
    }

    /// Whether a caller may retry after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletApiError::Unavailable | WalletApiError::InternalError
        )
    }
}

impl From<&PaymentError> for WalletApiError {
    fn from(error: &PaymentError) -> Self {
        match error {
            PaymentError::DustAmount => WalletApiError::Dust,
            PaymentError::IllegalAddress => WalletApiError::IllegalAddress,
            PaymentError::IllegalCostRate => WalletApiError::IllegalCostRate,
            PaymentError::NotEnoughFunds(cost) => WalletApiError::NotEnoughFunds(*cost),
            PaymentError::TransactionCostGreaterThanFunds => WalletApiError::TxCostEclipse,
            PaymentError::Other(_) => WalletApiError::InternalError,
        }
    }
}

impl From<KeyChainError> for WalletApiError {
    fn from(error: KeyChainError) -> Self {
        match error {
            KeyChainError::UserCancelledOrFailedAuthentication => WalletApiError::Cancel,
            KeyChainError::DecryptionFailed | KeyChainError::NotFound => {
                WalletApiError::InternalError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_map_to_api_errors() {
        assert_eq!(
            WalletApiError::from(&PaymentError::DustAmount),
            WalletApiError::Dust
        );
        assert_eq!(
            WalletApiError::from(&PaymentError::TransactionCostGreaterThanFunds),
            WalletApiError::TxCostEclipse
        );
        assert_eq!(
            WalletApiError::from(&PaymentError::Other("boom".to_owned())),
            WalletApiError::InternalError
        );
    }

    #[test]
    fn not_enough_funds_carries_cost() {
        let err = WalletApiError::from(&PaymentError::NotEnoughFunds(1234));
        assert_eq!(err.tx_cost(), Some(1234));
        assert_eq!(WalletApiError::Dust.tx_cost(), None);
    }

    #[test]
    fn keychain_cancel_maps_to_cancel() {
        assert_eq!(
            WalletApiError::from(KeyChainError::UserCancelledOrFailedAuthentication),
            WalletApiError::Cancel
        );
        assert_eq!(
            WalletApiError::from(KeyChainError::NotFound),
            WalletApiError::InternalError
        );
    }

    #[test]
    fn user_facing_descriptions() {
        assert_eq!(
            WalletApiError::Unavailable.to_string(),
            "Network unavailable, please try again"
        );
        assert_eq!(
            WalletApiError::FeeRateNil.to_string(),
            "Cannot fetch current Bitcoin network fees"
        );
    }

    #[test]
    fn transient_errors() {
        assert!(WalletApiError::Unavailable.is_transient());
        assert!(WalletApiError::InternalError.is_transient());
        assert!(!WalletApiError::Dust.is_transient());
    }
}

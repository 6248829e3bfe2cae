//! Loan records
//!
//! Two flavours of credit live in the system:
//! - OTC loans routed as encrypted proposals through the CCP-mediated
//!   protocol, tracked only on the lender's book with a tick-countdown tenor.
//! - Interbank loans recorded on both sides (lender's `given`, borrower's
//!   `received`) until settled or defaulted.

use serde::{Deserialize, Serialize};

/// OTC loan held on the lender's book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtcLoan {
    pub loan_id: String,
    /// Borrower's bank index
    pub target: usize,
    pub principal: f64,
    pub interest_rate: f64,
    /// Ticks until the principal plus interest falls due
    pub remaining_ticks: u32,
}

impl OtcLoan {
    /// Amount due at tenor end.
    pub fn amount_due(&self) -> f64 {
        self.principal * (1.0 + self.interest_rate)
    }
}

/// Interbank loan mirrored on lender and borrower books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterbankLoan {
    pub loan_id: String,
    pub borrower_id: String,
    pub lender_id: String,
    pub principal: f64,
    pub interest_rate: f64,
    pub maturity_tick: u64,
}

impl InterbankLoan {
    /// Flat interest owed at maturity.
    pub fn interest(&self) -> f64 {
        self.principal * self.interest_rate
    }

    /// Principal plus interest.
    pub fn repayment_due(&self) -> f64 {
        self.principal + self.interest()
    }

    /// Whether the loan has reached maturity at `tick`.
    pub fn is_due(&self, tick: u64) -> bool {
        tick >= self.maturity_tick
    }

    /// Whether the loan is past maturity plus the grace window.
    pub fn is_past_grace(&self, tick: u64, grace: u64) -> bool {
        tick > self.maturity_tick + grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan() -> InterbankLoan {
        InterbankLoan {
            loan_id: "loan_1".to_string(),
            borrower_id: "bank_01".to_string(),
            lender_id: "bank_00".to_string(),
            principal: 20.0,
            interest_rate: 0.05,
            maturity_tick: 10,
        }
    }

    #[test]
    fn test_repayment_due() {
        assert!((loan().repayment_due() - 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_due_and_grace_windows() {
        let l = loan();
        assert!(!l.is_due(9));
        assert!(l.is_due(10));
        assert!(!l.is_past_grace(12, 2));
        assert!(l.is_past_grace(13, 2));
    }

    #[test]
    fn test_otc_amount_due() {
        let l = OtcLoan {
            loan_id: "otc_1".to_string(),
            target: 3,
            principal: 10.0,
            interest_rate: 0.05,
            remaining_ticks: 6,
        };
        assert!((l.amount_due() - 10.5).abs() < 1e-12);
    }
}

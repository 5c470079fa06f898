use std::fmt;

use tabled::Tabled;

/// A float printed with a fixed number of decimal places.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Table row for bus results.
#[derive(Debug, Tabled)]
#[allow(non_snake_case)]
pub(crate) struct BusResTable {
    pub(crate) Bus: i64,
    pub(crate) Type: String,
    pub(crate) Vm_pu: FloatWrapper,
    pub(crate) Va_deg: FloatWrapper,
    pub(crate) P_gen: FloatWrapper,
    pub(crate) Q_gen: FloatWrapper,
    pub(crate) P_load: FloatWrapper,
    pub(crate) Q_load: FloatWrapper,
}

/// Table row for line results, per-unit.
#[derive(Debug, Tabled)]
pub(crate) struct LineResTable {
    pub(crate) line: i64,
    pub(crate) from: i64,
    pub(crate) to: i64,
    pub(crate) p_from: FloatWrapper,
    pub(crate) q_from: FloatWrapper,
    pub(crate) p_to: FloatWrapper,
    pub(crate) q_to: FloatWrapper,
    pub(crate) p_loss: FloatWrapper,
    pub(crate) q_loss: FloatWrapper,
    pub(crate) i_from: FloatWrapper,
    pub(crate) i_to: FloatWrapper,
}

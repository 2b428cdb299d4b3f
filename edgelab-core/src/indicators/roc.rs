//! Rate of Change (ROC): percent change over `period` bars. Lookback: period.

pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in period.max(1)..n {
        let prev = values[i - period.max(1)];
        if prev != 0.0 {
            result[i] = (values[i] - prev) / prev * 100.0;
        }
    }
    result
}

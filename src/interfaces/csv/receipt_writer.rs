use crate::domain::receipt::Receipt;
use crate::error::Result;
use chrono::SecondsFormat;
use serde::Serialize;
use std::io::Write;

/// Flat CSV projection of a receipt. Amounts are written with two decimals.
#[derive(Debug, Serialize)]
struct ReceiptRow<'a> {
    receipt_number: &'a str,
    order_number: &'a str,
    payment_number: &'a str,
    customer: &'a str,
    provider: &'a str,
    service: &'a str,
    original_amount: String,
    supplements_total: String,
    subtotal: String,
    platform_fee: String,
    processing_fee: String,
    total_amount: String,
    provider_amount: String,
    payment_method: &'a str,
    signed_by: &'a str,
    captured_at: String,
}

impl<'a> From<&'a Receipt> for ReceiptRow<'a> {
    fn from(receipt: &'a Receipt) -> Self {
        Self {
            receipt_number: &receipt.receipt_number,
            order_number: &receipt.order_number,
            payment_number: &receipt.payment_number,
            customer: &receipt.customer_name,
            provider: &receipt.provider_name,
            service: &receipt.service_description,
            original_amount: receipt.original_amount.to_string(),
            supplements_total: receipt.supplements_total.to_string(),
            subtotal: receipt.subtotal.to_string(),
            platform_fee: receipt.platform_fee.to_string(),
            processing_fee: receipt.processing_fee.to_string(),
            total_amount: receipt.total_amount.to_string(),
            provider_amount: receipt.provider_amount.to_string(),
            payment_method: &receipt.payment_method,
            signed_by: &receipt.terms.signature_name,
            captured_at: receipt.captured_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Writes receipts to any `Write` sink (stdout, a file).
pub struct ReceiptWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReceiptWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header and one row per receipt, ordered by capture time.
    pub fn write_receipts(&mut self, mut receipts: Vec<Receipt>) -> Result<()> {
        receipts.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.receipt_number.cmp(&b.receipt_number))
        });
        if receipts.is_empty() {
            self.writer.write_record([
                "receipt_number",
                "order_number",
                "payment_number",
                "customer",
                "provider",
                "service",
                "original_amount",
                "supplements_total",
                "subtotal",
                "platform_fee",
                "processing_fee",
                "total_amount",
                "provider_amount",
                "payment_method",
                "signed_by",
                "captured_at",
            ])?;
        }
        for receipt in &receipts {
            self.writer.serialize(ReceiptRow::from(receipt))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::SettlementError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::ProcessorId;
    use crate::domain::money::Money;
    use crate::domain::work_order::TermsAcceptance;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn receipt(number: &str, minutes: i64) -> Receipt {
        let captured_at =
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes);
        Receipt {
            id: Uuid::new_v4(),
            receipt_number: number.to_string(),
            payment_id: Uuid::new_v4(),
            payment_number: "PAY-1".to_string(),
            work_order_id: Uuid::new_v4(),
            order_number: "WO-1".to_string(),
            customer_name: "Dana Ruiz".to_string(),
            provider_name: "Ace Auto".to_string(),
            service_description: "Brake pads".to_string(),
            vehicle_description: "2019 Civic".to_string(),
            original_amount: Money::new(dec!(200)),
            supplements_total: Money::new(dec!(50)),
            subtotal: Money::new(dec!(250)),
            platform_fee: Money::new(dec!(25)),
            processing_fee: Money::new(dec!(7.55)),
            total_amount: Money::new(dec!(282.55)),
            provider_amount: Money::new(dec!(225)),
            processor: ProcessorId::Stripe,
            payment_method: "credit card via STRIPE".to_string(),
            terms: TermsAcceptance {
                service_accepted_at: captured_at,
                fraud_disclaimer_accepted_at: captured_at,
                cancellation_policy_accepted_at: captured_at,
                signature_name: "Dana Ruiz".to_string(),
            },
            captured_at,
            generated_at: captured_at,
        }
    }

    #[test]
    fn test_writes_rows_in_capture_order() {
        let mut writer = ReceiptWriter::new(Vec::new());
        writer
            .write_receipts(vec![receipt("RCT-2", 5), receipt("RCT-1", 0)])
            .unwrap();
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("receipt_number,order_number,payment_number"));
        assert!(lines[1].starts_with("RCT-1,"));
        assert!(lines[2].starts_with("RCT-2,"));
        assert!(lines[1].contains(",200.00,50.00,250.00,25.00,7.55,282.55,225.00,"));
        assert!(lines[1].ends_with(",2026-03-01T12:00:00Z"));
    }

    #[test]
    fn test_empty_export_still_has_header() {
        let mut writer = ReceiptWriter::new(Vec::new());
        writer.write_receipts(Vec::new()).unwrap();
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.starts_with("receipt_number,"));
    }
}

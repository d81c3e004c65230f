use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    PurchaseOrder,
    Quotation,
    Expense,
    GoodsReceipt,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseOrder => "purchase_order",
            Self::Quotation => "quotation",
            Self::Expense => "expense",
            Self::GoodsReceipt => "goods_receipt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "purchase_order" => Some(Self::PurchaseOrder),
            "quotation" => Some(Self::Quotation),
            "expense" => Some(Self::Expense),
            "goods_receipt" => Some(Self::GoodsReceipt),
            _ => None,
        }
    }
}

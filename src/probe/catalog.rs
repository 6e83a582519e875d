use crate::models::TableRole;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogicalField {
    Date,
    GuestCount,
    TableIdentifier,
    Amount,
    ItemName,
    Quantity,
    ReorderLevel,
    UnitPrice,
    GuestName,
    Email,
    VipFlag,
    VisitCount,
}

impl LogicalField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::GuestCount => "guest-count",
            Self::TableIdentifier => "table-identifier",
            Self::Amount => "amount",
            Self::ItemName => "item-name",
            Self::Quantity => "quantity",
            Self::ReorderLevel => "reorder-level",
            Self::UnitPrice => "unit-price",
            Self::GuestName => "guest-name",
            Self::Email => "email",
            Self::VipFlag => "vip-flag",
            Self::VisitCount => "visit-count",
        }
    }
}

/// Physical column names a logical field may go by, most likely first.
#[derive(Debug, Clone, Copy)]
pub struct FieldCandidates {
    pub field: LogicalField,
    pub candidates: &'static [&'static str],
    pub default: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub role: TableRole,
    pub fields: &'static [FieldCandidates],
}

impl TableSpec {
    pub fn table(&self) -> &'static str {
        self.role.as_str()
    }
}

const fn required(field: LogicalField, candidates: &'static [&'static str], default: &'static str) -> FieldCandidates {
    FieldCandidates {
        field,
        candidates,
        default,
        required: true,
    }
}

const fn optional(field: LogicalField, candidates: &'static [&'static str], default: &'static str) -> FieldCandidates {
    FieldCandidates {
        field,
        candidates,
        default,
        required: false,
    }
}

pub static RESERVATIONS: TableSpec = TableSpec {
    role: TableRole::Reservations,
    fields: &[
        required(LogicalField::Date, &["reservation_date", "date", "booking_date"], "date"),
        required(
            LogicalField::GuestCount,
            &["guest_count", "party_size", "number_of_guests", "guests"],
            "guest_count",
        ),
        required(LogicalField::TableIdentifier, &["table_number", "table_id", "table"], "table_number"),
    ],
};

pub static PAYMENTS: TableSpec = TableSpec {
    role: TableRole::Payments,
    fields: &[
        required(
            LogicalField::Date,
            &["payment_date", "created_at", "date", "transaction_date"],
            "created_at",
        ),
        required(LogicalField::Amount, &["amount", "total", "total_amount", "price"], "amount"),
    ],
};

pub static INVENTORY: TableSpec = TableSpec {
    role: TableRole::Inventory,
    fields: &[
        optional(LogicalField::ItemName, &["name", "item_name", "product_name"], "name"),
        required(
            LogicalField::Quantity,
            &["quantity", "stock", "current_stock", "quantity_in_stock"],
            "quantity",
        ),
        optional(
            LogicalField::ReorderLevel,
            &["reorder_level", "min_quantity", "minimum_stock", "threshold"],
            "reorder_level",
        ),
        optional(LogicalField::UnitPrice, &["unit_price", "price", "cost"], "unit_price"),
    ],
};

pub static GUESTS: TableSpec = TableSpec {
    role: TableRole::Guests,
    fields: &[
        optional(LogicalField::GuestName, &["full_name", "name", "guest_name"], "name"),
        optional(LogicalField::Email, &["email", "email_address"], "email"),
        optional(LogicalField::VipFlag, &["vip_status", "is_vip", "vip"], "vip_status"),
        optional(LogicalField::VisitCount, &["visit_count", "visits", "total_visits"], "visit_count"),
    ],
};

pub fn table_spec(role: TableRole) -> &'static TableSpec {
    match role {
        TableRole::Reservations => &RESERVATIONS,
        TableRole::Payments => &PAYMENTS,
        TableRole::Inventory => &INVENTORY,
        TableRole::Guests => &GUESTS,
    }
}

pub mod customer;
pub mod invoice;
pub mod template;

pub use customer::Customer;
pub use invoice::{
    Delivery, DraftPatch, Invoice, InvoiceItem, InvoiceStatus, InvoiceType, ItemInput,
    NewInvoice, Payment, PaymentMethod,
};
pub use template::{
    NewTemplate, RecurrenceRule, RecurrenceType, RecurrenceUnit, RecurringTemplate,
    TemplatePatch, TemplateStatus,
};

use crate::models::{ReturnProductLine, ReturnServiceLine, ReturnTransaction};
use crate::services::returns::{CreatedReturn, ReturnRequest, ReturnedProduct, ReturnedService};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReturnRequest {
    /// Sales invoice being returned against.
    #[validate(length(min = 1, message = "original_code is required"))]
    pub original_code: String,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(nested)]
    pub products: Vec<ReturnProductRequest>,
    #[serde(default)]
    #[validate(nested)]
    pub services: Vec<ReturnServiceRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReturnProductRequest {
    #[validate(length(min = 1, message = "lot_id is required"))]
    pub lot_id: String,
    /// Zero means "not returned"; negative values are refused by the processor.
    pub return_quantity: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReturnServiceRequest {
    #[validate(length(min = 1, message = "line_id is required"))]
    pub line_id: String,
    #[serde(default)]
    #[validate(length(max = 500, message = "return_reason must be at most 500 characters"))]
    pub return_reason: String,
}

impl From<CreateReturnRequest> for ReturnRequest {
    fn from(request: CreateReturnRequest) -> Self {
        Self {
            original_code: request.original_code,
            date: request.date,
            products: request
                .products
                .into_iter()
                .map(|p| ReturnedProduct {
                    lot_id: p.lot_id,
                    return_quantity: p.return_quantity,
                })
                .collect(),
            services: request
                .services
                .into_iter()
                .map(|s| ReturnedService {
                    line_id: s.line_id,
                    return_reason: s.return_reason,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateReturnResponse {
    pub id: String,
    pub total: Decimal,
}

impl From<CreatedReturn> for CreateReturnResponse {
    fn from(created: CreatedReturn) -> Self {
        Self {
            id: created.id,
            total: created.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    pub id: String,
    pub original_code: String,
    pub counterpart_id: String,
    pub date: NaiveDate,
    pub total: Decimal,
    pub created_by: String,
    pub products: Vec<ReturnProductLine>,
    pub services: Vec<ReturnServiceLine>,
    pub created_at: String,
}

impl From<ReturnTransaction> for ReturnResponse {
    fn from(ret: ReturnTransaction) -> Self {
        Self {
            id: ret.id,
            original_code: ret.original_code,
            counterpart_id: ret.counterpart_id,
            date: ret.date,
            total: ret.total,
            created_by: ret.created_by,
            products: ret.products,
            services: ret.services,
            created_at: ret.created_utc.to_rfc3339(),
        }
    }
}

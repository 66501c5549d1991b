//! Coordinator dashboard aggregates, computed per request.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;

const TOP_BATCHES: i64 = 5;
const TOP_COMPANIES: i64 = 10;

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_internships: i64,
    pub by_type: TypeCounts,
    pub by_source: SourceCounts,
    pub by_location: LocationCounts,
    pub by_verification: VerificationCounts,
    pub by_batch: Vec<GroupCount>,
    pub by_company: Vec<GroupCount>,
    pub stipend_stats: StipendStats,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct TypeCounts {
    pub academic: i64,
    pub industry: i64,
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    pub cdc: i64,
    pub non_cdc: i64,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct LocationCounts {
    pub india: i64,
    pub abroad: i64,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct VerificationCounts {
    pub verified: i64,
    pub unverified: i64,
}

/// One bucket of a grouped count; `_id` is the grouping key.
#[derive(Debug, Serialize, PartialEq, sqlx::FromRow)]
pub struct GroupCount {
    #[serde(rename = "_id")]
    pub id: String,
    pub count: i64,
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StipendStats {
    pub avg_stipend: f64,
    pub max_stipend: f64,
}

#[derive(sqlx::FromRow)]
struct TotalsRow {
    total: i64,
    academic: i64,
    industry: i64,
    cdc: i64,
    non_cdc: i64,
    india: i64,
    abroad: i64,
    verified: i64,
    unverified: i64,
    avg_stipend: f64,
    max_stipend: f64,
}

impl DashboardStats {
    fn from_parts(totals: TotalsRow, by_batch: Vec<GroupCount>, by_company: Vec<GroupCount>) -> Self {
        Self {
            total_internships: totals.total,
            by_type: TypeCounts {
                academic: totals.academic,
                industry: totals.industry,
            },
            by_source: SourceCounts {
                cdc: totals.cdc,
                non_cdc: totals.non_cdc,
            },
            by_location: LocationCounts {
                india: totals.india,
                abroad: totals.abroad,
            },
            by_verification: VerificationCounts {
                verified: totals.verified,
                unverified: totals.unverified,
            },
            by_batch,
            by_company,
            stipend_stats: StipendStats {
                avg_stipend: totals.avg_stipend,
                max_stipend: totals.max_stipend,
            },
        }
    }
}

pub async fn dashboard(pool: &PgPool) -> Result<DashboardStats> {
    let totals = sqlx::query_as::<_, TotalsRow>(
        "SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE internship_type = 'Academic') AS academic,
            COUNT(*) FILTER (WHERE internship_type = 'Industry') AS industry,
            COUNT(*) FILTER (WHERE obtained_through_cdc) AS cdc,
            COUNT(*) FILTER (WHERE NOT obtained_through_cdc) AS non_cdc,
            COUNT(*) FILTER (WHERE internship_location = 'India') AS india,
            COUNT(*) FILTER (WHERE internship_location = 'Abroad') AS abroad,
            COUNT(*) FILTER (WHERE verified) AS verified,
            COUNT(*) FILTER (WHERE NOT verified) AS unverified,
            COALESCE(AVG(stipend), 0)::DOUBLE PRECISION AS avg_stipend,
            COALESCE(MAX(stipend), 0)::DOUBLE PRECISION AS max_stipend
         FROM internships",
    )
    .fetch_one(pool)
    .await
    .context("failed to aggregate internship totals")?;

    let by_batch = sqlx::query_as::<_, GroupCount>(
        "SELECT batch AS id, COUNT(*) AS count
         FROM internships
         GROUP BY batch
         ORDER BY count DESC, batch ASC
         LIMIT $1",
    )
    .bind(TOP_BATCHES)
    .fetch_all(pool)
    .await
    .context("failed to group internships by batch")?;

    let by_company = sqlx::query_as::<_, GroupCount>(
        "SELECT company_name AS id, COUNT(*) AS count
         FROM internships
         GROUP BY company_name
         ORDER BY count DESC, company_name ASC
         LIMIT $1",
    )
    .bind(TOP_COMPANIES)
    .fetch_all(pool)
    .await
    .context("failed to group internships by company")?;

    Ok(DashboardStats::from_parts(totals, by_batch, by_company))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dashboard_reports_zeroes() {
        let value = serde_json::to_value(DashboardStats::default()).unwrap();
        assert_eq!(value["totalInternships"], 0);
        assert_eq!(value["stipendStats"]["avgStipend"], 0.0);
        assert_eq!(value["stipendStats"]["maxStipend"], 0.0);
        assert_eq!(value["byBatch"], serde_json::json!([]));
    }

    #[test]
    fn dashboard_uses_client_field_names() {
        let totals = TotalsRow {
            total: 3,
            academic: 1,
            industry: 2,
            cdc: 2,
            non_cdc: 1,
            india: 2,
            abroad: 1,
            verified: 1,
            unverified: 2,
            avg_stipend: 10000.0,
            max_stipend: 20000.0,
        };
        let stats = DashboardStats::from_parts(
            totals,
            vec![GroupCount {
                id: "2022-26".into(),
                count: 3,
            }],
            vec![GroupCount {
                id: "Acme Robotics".into(),
                count: 2,
            }],
        );

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["byType"]["industry"], 2);
        assert_eq!(value["bySource"]["nonCdc"], 1);
        assert_eq!(value["byLocation"]["abroad"], 1);
        assert_eq!(value["byVerification"]["unverified"], 2);
        assert_eq!(value["byBatch"][0]["_id"], "2022-26");
        assert_eq!(value["byCompany"][0]["count"], 2);
        assert_eq!(value["stipendStats"]["maxStipend"], 20000.0);
    }
}

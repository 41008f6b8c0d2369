//! Guest forms and invitation requests.
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteExecutor};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::model::{FormStage, GuestForm, InvitationRequest, InvitationRequestPatch};

const FORM_COLUMNS: &str = "guest_id, stage, additional_info, updated_at";
const REQUEST_COLUMNS: &str = "guest_id, address, address_specification";

fn form_from_row(row: &SqliteRow) -> Result<GuestForm> {
    let stage: String = row.try_get("stage")?;
    Ok(GuestForm {
        guest_id: row.try_get("guest_id")?,
        stage: FormStage::parse_stage(&stage)
            .ok_or_else(|| Error::Integrity(format!("unknown form stage {}", stage)))?,
        additional_info: row.try_get("additional_info")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<InvitationRequest> {
    Ok(InvitationRequest {
        guest_id: row.try_get("guest_id")?,
        address: row.try_get("address")?,
        address_specification: row.try_get("address_specification")?,
    })
}

#[instrument(skip_all)]
pub async fn find_form<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
) -> Result<Option<GuestForm>> {
    let sql = format!("SELECT {} FROM guests_forms WHERE guest_id = ?", FORM_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(guest_id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(form_from_row).transpose()
}

pub async fn get_form<'e, E: SqliteExecutor<'e>>(executor: E, guest_id: i64) -> Result<GuestForm> {
    find_form(executor, guest_id)
        .await?
        .ok_or_else(|| Error::ObjectNotFound(format!("form of guest {}", guest_id)))
}

/// Insert a new form. A second form for the same guest is an `Integrity` error.
#[instrument(skip_all, fields(guest_id = form.guest_id))]
pub async fn create_form<'e, E: SqliteExecutor<'e>>(
    executor: E,
    form: &GuestForm,
) -> Result<GuestForm> {
    let sql = format!(
        "INSERT INTO guests_forms (guest_id, stage, additional_info) VALUES (?, ?, ?) RETURNING {}",
        FORM_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(form.guest_id)
        .bind(form.stage.as_str())
        .bind(form.additional_info.as_deref())
        .fetch_one(executor)
        .await?;
    form_from_row(&row)
}

/// Persist stage and additional info of an existing form.
#[instrument(skip_all, fields(guest_id = form.guest_id, stage = form.stage.as_str()))]
pub async fn update_form<'e, E: SqliteExecutor<'e>>(
    executor: E,
    form: &GuestForm,
) -> Result<GuestForm> {
    let sql = format!(
        "UPDATE guests_forms SET stage = ?, additional_info = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE guest_id = ? RETURNING {}",
        FORM_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(form.stage.as_str())
        .bind(form.additional_info.as_deref())
        .bind(form.guest_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::ObjectNotFound(format!("form of guest {}", form.guest_id)))?;
    form_from_row(&row)
}

#[instrument(skip_all)]
pub async fn find_invitation_request<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
) -> Result<Option<InvitationRequest>> {
    let sql = format!(
        "SELECT {} FROM invitations_requests WHERE guest_id = ?",
        REQUEST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(guest_id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(request_from_row).transpose()
}

pub async fn get_invitation_request<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
) -> Result<InvitationRequest> {
    find_invitation_request(executor, guest_id)
        .await?
        .ok_or_else(|| Error::ObjectNotFound(format!("invitation request of guest {}", guest_id)))
}

#[instrument(skip_all, fields(guest_id = request.guest_id))]
pub async fn create_invitation_request<'e, E: SqliteExecutor<'e>>(
    executor: E,
    request: &InvitationRequest,
) -> Result<InvitationRequest> {
    let sql = format!(
        "INSERT INTO invitations_requests (guest_id, address, address_specification) \
         VALUES (?, ?, ?) RETURNING {}",
        REQUEST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(request.guest_id)
        .bind(request.address.as_deref())
        .bind(request.address_specification.as_deref())
        .fetch_one(executor)
        .await?;
    request_from_row(&row)
}

/// Write only the columns present in `patch`. Missing rows are `ObjectNotFound`.
#[instrument(skip_all, fields(guest_id = guest_id))]
pub async fn patch_invitation_request<'e, E: SqliteExecutor<'e>>(
    executor: E,
    guest_id: i64,
    patch: &InvitationRequestPatch,
) -> Result<InvitationRequest> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE invitations_requests SET ");
    if let Some(address) = &patch.address {
        qb.push("address = ").push_bind(address.clone()).push(", ");
    }
    if let Some(specification) = &patch.address_specification {
        qb.push("address_specification = ")
            .push_bind(specification.clone())
            .push(", ");
    }
    if patch.is_empty() {
        debug!("empty invitation request patch");
    }
    qb.push("updated_at = CURRENT_TIMESTAMP WHERE guest_id = ")
        .push_bind(guest_id)
        .push(" RETURNING ")
        .push(REQUEST_COLUMNS);

    let row = qb
        .build()
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::ObjectNotFound(format!("invitation request of guest {}", guest_id)))?;
    request_from_row(&row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_guest, setup_pool};

    #[tokio::test]
    async fn second_form_is_integrity_error() {
        let pool = setup_pool().await;
        let guest_id = insert_guest(&pool, "79990000001").await;
        let form = GuestForm::new(guest_id, FormStage::AwaitingAnswer);
        create_form(&pool, &form).await.unwrap();

        let err = create_form(&pool, &form).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)), "got {err:?}");
        assert!(find_form(&pool, guest_id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_form_persists_stage_and_info() {
        let pool = setup_pool().await;
        let guest_id = insert_guest(&pool, "79990000002").await;
        let mut form = create_form(&pool, &GuestForm::new(guest_id, FormStage::AwaitingAnswer))
            .await
            .unwrap();
        assert!(form.updated_at.is_some());

        form.stage = FormStage::Completed;
        form.additional_info = Some("vegetarian".into());
        update_form(&pool, &form).await.unwrap();

        let stored = get_form(&pool, guest_id).await.unwrap();
        assert_eq!(stored.stage, FormStage::Completed);
        assert_eq!(stored.additional_info.as_deref(), Some("vegetarian"));

        let missing = GuestForm::new(guest_id + 100, FormStage::Declined);
        assert!(matches!(
            update_form(&pool, &missing).await.unwrap_err(),
            Error::ObjectNotFound(_)
        ));
    }

    #[tokio::test]
    async fn partial_updates_do_not_clobber_other_fields() {
        let pool = setup_pool().await;
        let guest_id = insert_guest(&pool, "79990000003").await;
        create_invitation_request(&pool, &InvitationRequest { guest_id, ..Default::default() })
            .await
            .unwrap();

        let patch = InvitationRequestPatch::address_specification(Some("entrance 2".into()));
        patch_invitation_request(&pool, guest_id, &patch).await.unwrap();
        let patch = InvitationRequestPatch::address(Some("Minsk, Lenina 1".into()));
        let request = patch_invitation_request(&pool, guest_id, &patch).await.unwrap();
        assert_eq!(request.address.as_deref(), Some("Minsk, Lenina 1"));
        assert_eq!(request.address_specification.as_deref(), Some("entrance 2"));

        let request = patch_invitation_request(&pool, guest_id, &InvitationRequestPatch::address(None))
            .await
            .unwrap();
        assert_eq!(request.address, None);
        assert_eq!(request.address_specification.as_deref(), Some("entrance 2"));

        let err = patch_invitation_request(&pool, guest_id + 1, &patch).await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)));
    }
}

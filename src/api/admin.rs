use rocket::{serde::json::Json, Route, State};

use crate::{
    audit::{audit, AuditReport, LedgerDump},
    coordinator::RECONCILE_TARGET,
    error::{Error, Result},
    model::{
        api::{
            auth::{Admin, AuthToken},
            candidate::CandidateWithTally,
            stats::Stats,
            voter::VoterDescription,
        },
        db::{CandidateSpec, VoterId},
    },
    store::{StoreError, Stores},
};

pub fn routes() -> Vec<Route> {
    routes![
        create_candidate,
        candidates,
        voters,
        voter,
        stats,
        audit_report,
        dump,
    ]
}

#[post("/admin/candidates", data = "<spec>", format = "json")]
pub async fn create_candidate(
    token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    stores: &State<Stores>,
) -> Result<Json<CandidateWithTally>> {
    if let Some(field) = spec.missing_field() {
        return Err(Error::bad_request(format!("Candidate {field} is required")));
    }

    let candidate = stores.candidates.create(spec.into_inner()).await?;
    info!(
        "Admin {} added candidate {} ({})",
        token.id(),
        candidate.id,
        candidate.name
    );
    Ok(Json(candidate.into()))
}

#[get("/admin/candidates")]
pub async fn candidates(
    _token: AuthToken<Admin>,
    stores: &State<Stores>,
) -> Result<Json<Vec<CandidateWithTally>>> {
    let candidates = stores
        .candidates
        .list()
        .await?
        .into_iter()
        .map(CandidateWithTally::from)
        .collect();
    Ok(Json(candidates))
}

#[get("/admin/voters")]
pub async fn voters(
    _token: AuthToken<Admin>,
    stores: &State<Stores>,
) -> Result<Json<Vec<VoterDescription>>> {
    let voters = stores
        .voters
        .list()
        .await?
        .into_iter()
        .map(VoterDescription::from)
        .collect();
    Ok(Json(voters))
}

#[get("/admin/voters/<voter_id>")]
pub async fn voter(
    _token: AuthToken<Admin>,
    voter_id: VoterId,
    stores: &State<Stores>,
) -> Result<Json<VoterDescription>> {
    match stores.voters.get(voter_id).await {
        Ok(voter) => Ok(Json(voter.into())),
        Err(StoreError::NotFound) => Err(Error::not_found(format!("Voter {voter_id}"))),
        Err(e) => Err(e.into()),
    }
}

#[get("/admin/stats")]
pub async fn stats(_token: AuthToken<Admin>, stores: &State<Stores>) -> Result<Json<Stats>> {
    Ok(Json(Stats::gather(stores).await?))
}

#[get("/admin/audit")]
pub async fn audit_report(
    _token: AuthToken<Admin>,
    stores: &State<Stores>,
) -> Result<Json<AuditReport>> {
    let report = audit(&LedgerDump::capture(stores).await?);
    for discrepancy in &report.discrepancies {
        log::warn!(target: RECONCILE_TARGET, "Audit: {discrepancy}");
    }
    Ok(Json(report))
}

/// Everything the offline audit tool needs.
#[get("/admin/dump")]
pub async fn dump(_token: AuthToken<Admin>, stores: &State<Stores>) -> Result<Json<LedgerDump>> {
    Ok(Json(LedgerDump::capture(stores).await?))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json::json,
    };

    use super::*;
    use crate::audit::Discrepancy;
    use crate::model::db::{Role, VoterProfile};
    use crate::TestBackend;

    async fn add_candidate(client: &Client, spec: &CandidateSpec) -> (Status, Option<CandidateWithTally>) {
        let response = client
            .post(uri!(create_candidate))
            .header(ContentType::JSON)
            .body(json!(spec).to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json().await)
    }

    #[backend_test(admin)]
    async fn create_and_list_candidates(client: Client, backend: TestBackend) {
        let (status, first) = add_candidate(&client, &CandidateSpec::example()).await;
        assert_eq!(Status::Ok, status);
        let first = first.unwrap();
        assert_eq!(first.vote_count, 0);
        assert_eq!(first.candidate.name, CandidateSpec::example().name);

        let (_, second) = add_candidate(&client, &CandidateSpec::example2()).await;
        let second = second.unwrap();

        backend
            .stores
            .candidates
            .increment_vote(second.candidate.id)
            .await
            .unwrap();

        let response = client.get(uri!(candidates)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let listed: Vec<CandidateWithTally> = response.into_json().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].candidate.id, first.candidate.id);
        assert_eq!(listed[0].vote_count, 0);
        assert_eq!(listed[1].candidate.id, second.candidate.id);
        assert_eq!(listed[1].vote_count, 1);
    }

    #[backend_test(admin)]
    async fn candidate_requires_name_party_and_position(client: Client, backend: TestBackend) {
        for field in ["name", "party", "position"] {
            let mut spec = CandidateSpec::example();
            match field {
                "name" => spec.name.clear(),
                "party" => spec.party = " ".to_string(),
                _ => spec.position.clear(),
            }
            let (status, _) = add_candidate(&client, &spec).await;
            assert_eq!(Status::BadRequest, status, "blank {field} was accepted");
        }

        assert_eq!(backend.stores.candidates.count().await.unwrap(), 0);
    }

    #[backend_test(admin)]
    async fn voters_table(client: Client, backend: TestBackend) {
        let ada = backend
            .stores
            .voters
            .create(VoterId::new(), VoterProfile::example())
            .await
            .unwrap();

        let response = client.get(uri!(voters)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let voters: Vec<VoterDescription> = response.into_json().await.unwrap();
        assert_eq!(voters.len(), 2);
        assert_eq!(voters[0].role, Role::Admin);
        assert_eq!(voters[1], VoterDescription::from(ada.clone()));

        let response = client.get(uri!(voter(ada.id))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let description: VoterDescription = response.into_json().await.unwrap();
        assert_eq!(description, VoterDescription::from(ada));

        let response = client.get(uri!(voter(VoterId::new()))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn stats_count_voters_and_votes(client: Client, backend: TestBackend) {
        let candidate = backend
            .stores
            .candidates
            .create(CandidateSpec::example())
            .await
            .unwrap();
        for profile in [VoterProfile::example(), VoterProfile::example2()] {
            backend
                .stores
                .voters
                .create(VoterId::new(), profile)
                .await
                .unwrap();
        }
        let voters = backend.stores.voters.list().await.unwrap();
        let ada = voters.iter().find(|v| v.role == Role::Voter).unwrap();
        let record = backend
            .stores
            .ledger
            .append(ada.id, candidate.id, chrono::Utc::now())
            .await
            .unwrap();
        backend
            .stores
            .voters
            .mark_voted(ada.id, record.cast_at)
            .await
            .unwrap();
        backend
            .stores
            .candidates
            .increment_vote(candidate.id)
            .await
            .unwrap();

        let response = client.get(uri!(stats)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let stats: Stats = response.into_json().await.unwrap();
        assert_eq!(
            stats,
            Stats {
                total_voters: 2,
                votes_cast: 1,
                remaining_voters: 1,
                total_candidates: 1,
                ledger_records: 1,
            }
        );
    }

    #[backend_test(admin)]
    async fn audit_reports_tally_mismatch(client: Client, backend: TestBackend) {
        let candidate = backend
            .stores
            .candidates
            .create(CandidateSpec::example())
            .await
            .unwrap();

        let response = client.get(uri!(audit_report)).dispatch().await;
        let report: AuditReport = response.into_json().await.unwrap();
        assert!(report.is_consistent());

        backend.store.set_vote_count(candidate.id, 3);

        let response = client.get(uri!(audit_report)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let report: AuditReport = response.into_json().await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.total_tally, 3);
        assert_eq!(report.total_records, 0);
        assert!(report.discrepancies.iter().any(|d| matches!(
            d,
            Discrepancy::TallyMismatch { candidate_id, .. } if *candidate_id == candidate.id
        )));
    }

    #[backend_test(admin)]
    async fn dump_matches_stores(client: Client, backend: TestBackend) {
        backend
            .stores
            .candidates
            .create(CandidateSpec::example())
            .await
            .unwrap();

        let response = client.get(uri!(dump)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let dumped: LedgerDump = response.into_json().await.unwrap();
        assert_eq!(dumped, LedgerDump::capture(&backend.stores).await.unwrap());
    }

    #[backend_test(voter)]
    async fn voters_are_forbidden(client: Client) {
        let response = client.get(uri!(candidates)).dispatch().await;
        assert_eq!(Status::Forbidden, response.status());
        let response = client.get(uri!(audit_report)).dispatch().await;
        assert_eq!(Status::Forbidden, response.status());
        let (status, _) = add_candidate(&client, &CandidateSpec::example()).await;
        assert_eq!(Status::Forbidden, status);
    }

    #[backend_test]
    async fn anonymous_requests_are_unauthorized(client: Client) {
        for uri in [uri!(voters), uri!(stats), uri!(dump)] {
            let response = client.get(uri).dispatch().await;
            assert_eq!(Status::Unauthorized, response.status());
        }
    }
}

use rocket::{
    http::{CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    coordinator::{Coordinator, VoteAttempt, VoteError},
    error::{Error, Result},
    logging::RequestId,
    model::{
        api::{
            auth::{Anyone, AuthToken},
            receipt::VoteReceipt,
            voter::{VerificationStatus, VoteRequest, VoteStatus},
        },
        db::Voter,
    },
    verification::{Gate, GateOutcome, Method, Verification},
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![verify, vote, status]
}

/// Run one verification method through the gate and add it to the caller's
/// proof. A fresh proof is started if the old one has expired.
#[post("/voter/verify/<method>")]
pub async fn verify(
    method: Method,
    token: AuthToken<Anyone>,
    existing: Option<Verification>,
    cookies: &CookieJar<'_>,
    gate: &State<Gate>,
    coordinator: &State<Coordinator>,
    config: &State<Config>,
) -> Result<Json<VerificationStatus>> {
    match gate.verify(token.id(), method).await? {
        GateOutcome::Verified => {}
        GateOutcome::Failed => {
            warn!("Voter {} failed {method} verification", token.id());
            return Err(Error::Status(
                Status::Forbidden,
                format!("{method} verification failed"),
            ));
        }
    }

    let mut proof = Verification::resume(existing, token.id(), config.verification_ttl());
    proof.methods.insert(method);
    proof.store(cookies);
    debug!("Voter {} passed {method} verification", token.id());

    Ok(Json(VerificationStatus::new(
        &proof,
        coordinator.required_methods(),
    )))
}

/// Cast the caller's vote. Admins get this far but are turned away by the
/// coordinator.
#[post("/voter/vote", data = "<request>", format = "json")]
pub async fn vote(
    request: Json<VoteRequest>,
    token: AuthToken<Anyone>,
    proof: Option<Verification>,
    cookies: &CookieJar<'_>,
    coordinator: &State<Coordinator>,
    request_id: &RequestId,
) -> Result<Json<VoteReceipt>> {
    let mut attempt = VoteAttempt::new(token.id(), request.candidate_id);
    debug!(
        "{request_id}: vote attempt by {} for candidate {}",
        attempt.voter_id(),
        attempt.candidate_id()
    );
    coordinator.verify_identity(&mut attempt, proof.as_ref())?;

    let result = coordinator.cast_vote(&mut attempt).await;

    // Once the ledger holds a record the proof can never be used again.
    if matches!(
        result,
        Ok(_) | Err(VoteError::AlreadyVoted | VoteError::PartiallyFailed { .. })
    ) {
        Verification::clear(cookies);
    }

    Ok(Json(result?.into()))
}

#[get("/voter/status")]
pub fn status(token: AuthToken<Voter>) -> Json<VoteStatus> {
    Json((&token.voter).into())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rocket::{http::ContentType, local::asynchronous::Client, serde::json::serde_json::json};

    use super::*;
    use crate::model::db::{CandidateId, CandidateSpec};
    use crate::store::memory::FaultPoint;
    use crate::verification::{Script, VERIFICATION_COOKIE};
    use crate::TestBackend;

    async fn pass(client: &Client, method: Method) -> VerificationStatus {
        let response = client
            .post(format!("/voter/verify/{method}"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    async fn cast(client: &Client, candidate_id: CandidateId) -> Status {
        client
            .post(uri!(vote))
            .header(ContentType::JSON)
            .body(json!(VoteRequest { candidate_id }).to_string())
            .dispatch()
            .await
            .status()
    }

    async fn candidate(backend: &TestBackend) -> CandidateId {
        backend
            .stores
            .candidates
            .create(CandidateSpec::example())
            .await
            .unwrap()
            .id
    }

    async fn tally(backend: &TestBackend, candidate_id: CandidateId) -> u64 {
        backend
            .stores
            .candidates
            .get(candidate_id)
            .await
            .unwrap()
            .vote_count
    }

    #[backend_test(voter)]
    async fn verified_voter_can_vote(client: Client, backend: TestBackend) {
        let candidate_id = candidate(&backend).await;

        let progress = pass(&client, Method::Face).await;
        assert_eq!(progress.remaining, BTreeSet::from([Method::Biometric]));
        let progress = pass(&client, Method::Biometric).await;
        assert!(progress.remaining.is_empty());

        let response = client
            .post(uri!(vote))
            .header(ContentType::JSON)
            .body(json!(VoteRequest { candidate_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let receipt: VoteReceipt = response.into_json().await.unwrap();
        assert_eq!(receipt.candidate_id, candidate_id);

        // The proof was spent, so a replay is turned away before eligibility.
        assert_eq!(Status::Forbidden, cast(&client, candidate_id).await);

        let response = client.get(uri!(status)).dispatch().await;
        let status: VoteStatus = response.into_json().await.unwrap();
        assert!(status.has_voted);
        assert_eq!(status.voted_at, Some(receipt.cast_at));

        assert_eq!(tally(&backend, candidate_id).await, 1);
        assert_eq!(backend.stores.ledger.count_for(candidate_id).await.unwrap(), 1);
    }

    #[backend_test(voter)]
    async fn unverified_vote_is_forbidden(client: Client, backend: TestBackend) {
        let candidate_id = candidate(&backend).await;

        assert_eq!(Status::Forbidden, cast(&client, candidate_id).await);

        pass(&client, Method::Face).await;
        assert_eq!(Status::Forbidden, cast(&client, candidate_id).await);

        assert_eq!(tally(&backend, candidate_id).await, 0);
        assert_eq!(backend.stores.ledger.count().await.unwrap(), 0);
    }

    #[backend_test(voter)]
    async fn second_vote_conflicts(client: Client, backend: TestBackend) {
        let candidate_id = candidate(&backend).await;
        pass(&client, Method::Face).await;
        pass(&client, Method::Biometric).await;
        assert_eq!(Status::Ok, cast(&client, candidate_id).await);

        pass(&client, Method::Face).await;
        pass(&client, Method::Biometric).await;
        assert_eq!(Status::Conflict, cast(&client, candidate_id).await);

        assert_eq!(tally(&backend, candidate_id).await, 1);
    }

    #[backend_test(voter)]
    async fn failed_verification_grants_nothing(client: Client, backend: TestBackend) {
        backend.gate.set(Script::Reject);

        let response = client.post("/voter/verify/face").dispatch().await;
        assert_eq!(Status::Forbidden, response.status());
        assert!(response.cookies().get(VERIFICATION_COOKIE).is_none());
        assert_eq!(backend.gate.calls(), 1);
    }

    #[backend_test(voter)]
    async fn hanging_gate_times_out(client: Client, backend: TestBackend) {
        backend.gate.set(Script::Hang);

        let response = client.post("/voter/verify/biometric").dispatch().await;
        assert_eq!(Status::GatewayTimeout, response.status());
        assert!(response.cookies().get(VERIFICATION_COOKIE).is_none());

        // The check can simply be retried.
        backend.gate.set(Script::Accept);
        pass(&client, Method::Biometric).await;
    }

    #[backend_test(voter)]
    async fn unknown_method_is_not_routed(client: Client, backend: TestBackend) {
        let response = client.post("/voter/verify/retina").dispatch().await;
        assert!(response.status().class().is_client_error());
        assert_eq!(backend.gate.calls(), 0);
    }

    #[backend_test(voter)]
    async fn unknown_candidate_is_not_found(client: Client, backend: TestBackend) {
        pass(&client, Method::Face).await;
        pass(&client, Method::Biometric).await;

        assert_eq!(Status::NotFound, cast(&client, CandidateId::new()).await);
        assert_eq!(backend.stores.ledger.count().await.unwrap(), 0);

        let status: VoteStatus = client
            .get(uri!(status))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(!status.has_voted);
    }

    #[backend_test(admin)]
    async fn admins_cannot_vote(client: Client, backend: TestBackend) {
        let candidate_id = candidate(&backend).await;
        pass(&client, Method::Face).await;
        pass(&client, Method::Biometric).await;

        assert_eq!(Status::Forbidden, cast(&client, candidate_id).await);
        assert_eq!(tally(&backend, candidate_id).await, 0);

        let response = client.get(uri!(status)).dispatch().await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn anonymous_requests_are_unauthorized(client: Client, backend: TestBackend) {
        let candidate_id = candidate(&backend).await;

        let response = client.post("/voter/verify/face").dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(Status::Unauthorized, cast(&client, candidate_id).await);
        let response = client.get(uri!(status)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(voter)]
    async fn partial_failure_is_reported_and_never_double_counted(
        client: Client,
        backend: TestBackend,
    ) {
        let candidate_id = candidate(&backend).await;
        backend.store.fail_next(FaultPoint::MarkVoted).unwrap();

        pass(&client, Method::Face).await;
        pass(&client, Method::Biometric).await;
        assert_eq!(Status::InternalServerError, cast(&client, candidate_id).await);
        assert_eq!(tally(&backend, candidate_id).await, 1);

        // The retry repairs the registry flag instead of voting again.
        pass(&client, Method::Face).await;
        pass(&client, Method::Biometric).await;
        assert_eq!(Status::Conflict, cast(&client, candidate_id).await);

        let status: VoteStatus = client
            .get(uri!(status))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(status.has_voted);
        assert_eq!(tally(&backend, candidate_id).await, 1);
        assert_eq!(backend.stores.ledger.count().await.unwrap(), 1);
    }
}

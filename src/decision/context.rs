use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::db::{
    Decision, FileStage, ReviewAssignment, ReviewRound, ReviewRoundId, ReviewRoundStatus, Role,
    Stage, StageAssignment, Submission, SubmissionFile, User, UserId,
};
use crate::decision::Pipeline;
use crate::review::{self, RoundFacts};

/// Everything a decision is judged against, loaded once per request.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub pipeline: Pipeline,
    pub submission: Submission,
    pub actor: User,
    pub participants: Vec<StageAssignment>,
    pub users: HashMap<UserId, User>,
    pub rounds: Vec<ReviewRound>,
    /// The round named by the request, already checked to belong to the submission.
    pub round: Option<ReviewRound>,
    pub assignments: Vec<ReviewAssignment>,
    pub files: Vec<SubmissionFile>,
    pub decisions: Vec<Decision>,
    pub now: DateTime<Utc>,
}

impl DecisionContext {
    fn actor_editor_assignments(&self) -> impl Iterator<Item = &StageAssignment> {
        self.participants
            .iter()
            .filter(move |p| p.user_id == self.actor.id && p.role.is_editor())
    }

    pub fn actor_is_editor(&self) -> bool {
        self.actor_editor_assignments().next().is_some()
    }

    /// An editor is recommend-only unless one of their assignments lets them decide.
    pub fn actor_recommend_only(&self) -> bool {
        self.actor_is_editor() && self.actor_editor_assignments().all(|p| p.recommend_only)
    }

    pub fn rounds_in(&self, stage: Stage) -> impl Iterator<Item = &ReviewRound> {
        self.rounds.iter().filter(move |r| r.stage == stage)
    }

    pub fn has_rounds_in(&self, stage: Stage) -> bool {
        self.rounds_in(stage).next().is_some()
    }

    pub fn latest_round(&self, stage: Stage) -> Option<&ReviewRound> {
        self.rounds_in(stage).max_by_key(|r| r.round)
    }

    pub fn is_sole_round(&self, round: &ReviewRound) -> bool {
        self.rounds_in(round.stage).all(|r| r.id == round.id)
    }

    pub fn round_assignments(&self, round_id: ReviewRoundId) -> Vec<&ReviewAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.review_round_id == round_id)
            .collect()
    }

    pub fn users_with_role(&self, role: Role) -> Vec<&User> {
        let mut seen = HashSet::new();
        self.participants
            .iter()
            .filter(|p| p.role == role && seen.insert(p.user_id))
            .filter_map(|p| self.users.get(&p.user_id))
            .collect()
    }

    pub fn authors(&self) -> Vec<&User> {
        self.users_with_role(Role::Author)
    }

    /// Editors who may take decisions, in assignment order.
    pub fn deciding_editors(&self) -> Vec<&User> {
        let mut seen = HashSet::new();
        self.participants
            .iter()
            .filter(|p| p.role.is_editor() && !p.recommend_only && seen.insert(p.user_id))
            .filter_map(|p| self.users.get(&p.user_id))
            .collect()
    }

    pub fn recommend_only_editor_ids(&self) -> HashSet<UserId> {
        review::recommend_only_editors(&self.participants)
    }

    pub fn files_in(&self, stages: &[FileStage], round_id: Option<ReviewRoundId>) -> Vec<&SubmissionFile> {
        self.files
            .iter()
            .filter(|f| stages.contains(&f.file_stage) && f.review_round_id == round_id)
            .collect()
    }

    /// Round status worked out from the loaded state, starting from `status`.
    pub fn determine_round_status(
        &self,
        round: &ReviewRound,
        status: ReviewRoundStatus,
    ) -> ReviewRoundStatus {
        let assignments: Vec<ReviewAssignment> =
            self.round_assignments(round.id).into_iter().cloned().collect();
        let editors = self.recommend_only_editor_ids();
        let recommenders = review::recommenders(round.id, &self.decisions, &editors);
        review::determine_round_status(&RoundFacts {
            status,
            assignments: &assignments,
            revisions_uploaded: review::revisions_uploaded(round.id, &self.files, &self.decisions),
            recommend_only_editors: &editors,
            recommenders: &recommenders,
            now: self.now,
        })
    }
}

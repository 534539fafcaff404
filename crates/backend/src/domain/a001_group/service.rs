use contracts::domain::a001_group::aggregate::{dedup_by_client, Contributor, Group, GroupId};
use contracts::domain::a001_group::dto::{
    CreateGroupDto, GroupListQuery, GroupView, ProductRef, RecordPaymentDto, StoreRef,
    UpdateGroupDto,
};
use contracts::domain::common::AggregateId;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Arc;

use super::policy::{assert_creator, require_client};
use super::repository::{self, ListFilter, ReadStamp, UpdateOutcome};
use crate::domain::a003_product::catalog::{resolve_snapshot, ProductCatalog};
use crate::shared::clock::Clock;
use crate::shared::error::{AppError, AppResult};
use crate::shared::listing::{parse_sort, PageRequest};
use crate::shared::media::MediaStore;
use crate::system::users::repository as users_repository;

/// Страница списка групп
#[derive(Debug, Clone)]
pub struct GroupPage {
    pub items: Vec<GroupView>,
    pub count: u64,
    pub page: PageRequest,
}

/// Разбор ID группы из запроса. Некорректный ID неотличим от отсутствующей группы.
pub fn parse_group_id(raw: &str) -> AppResult<GroupId> {
    GroupId::from_string(raw.trim()).map_err(|_| AppError::NotFound("group.not_found"))
}

/// Ошибка правила реестра в ошибку API
fn ledger_error(key: &'static str) -> AppError {
    match key {
        "contributor.not_found" => AppError::NotFound(key),
        _ => AppError::BadRequest(key),
    }
}

fn check_amount(value: Option<f64>, key: &'static str) -> AppResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(AppError::BadRequest(key)),
        _ => Ok(()),
    }
}

pub struct GroupService {
    db: DatabaseConnection,
    catalog: Arc<dyn ProductCatalog>,
    media: Arc<dyn MediaStore>,
    clock: Arc<dyn Clock>,
}

impl GroupService {
    pub fn new(
        db: DatabaseConnection,
        catalog: Arc<dyn ProductCatalog>,
        media: Arc<dyn MediaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            catalog,
            media,
            clock,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn create(&self, creator: &str, dto: CreateGroupDto) -> AppResult<GroupView> {
        let creator = require_client(creator)?;
        if dto.name.trim().is_empty() {
            return Err(AppError::BadRequest("group.name_required"));
        }
        if dto.product.trim().is_empty() {
            return Err(AppError::BadRequest("group.product_required"));
        }

        if let Some(image) = dto.image.as_deref() {
            self.check_client_image(image, None)?;
        }

        let snapshot = resolve_snapshot(self.catalog.as_ref(), &dto.product).await?;
        let group = Group::new_for_insert(creator, dto, snapshot, self.clock.now());
        group.validate().map_err(AppError::BadRequest)?;

        repository::insert(&self.db, &group).await?;
        tracing::info!(
            "Group {} created by {} (target {})",
            group.id,
            creator,
            group.target_amount
        );

        let stored = self.load(&group.id).await?;
        self.populate(&stored).await
    }

    pub async fn list(&self, client: &str, query: GroupListQuery) -> AppResult<GroupPage> {
        let client = require_client(client)?;
        let page = PageRequest::clamp(query.page, query.limit);
        let sort = parse_sort(query.sort.as_deref())?;
        let filter = ListFilter {
            search: query.search,
            status: query.status,
            is_active: query.is_active,
        };

        let closed = repository::close_expired_for_member(&self.db, client, self.clock.now()).await?;
        if closed > 0 {
            tracing::info!("Closed {} expired group(s) on list by {}", closed, client);
        }

        let (groups, count) =
            repository::list_for_member(&self.db, client, &filter, sort, page).await?;
        let items = self.populate_many(&groups).await?;
        Ok(GroupPage { items, count, page })
    }

    /// Группа для участника. Не-участник получает `NotFound`.
    pub async fn get(&self, client: &str, id: &str) -> AppResult<GroupView> {
        let client = require_client(client)?;
        let id = parse_group_id(id)?;
        let group = self.observe(&id).await?;
        if !group.is_member(client) {
            return Err(AppError::NotFound("group.not_found"));
        }
        self.populate(&group).await
    }

    pub async fn update(&self, client: &str, id: &str, dto: UpdateGroupDto) -> AppResult<GroupView> {
        let id = parse_group_id(id)?;
        assert_creator(&self.db, client, &id).await?;
        check_amount(dto.target_amount, "group.invalid_target_amount")?;
        // collectedAmount только проверяется: хранимое значение всегда пересчитывается
        check_amount(dto.collected_amount, "group.invalid_collected_amount")?;

        let mut group = self.load(&id).await?;
        let read = ReadStamp::of(&group);

        if let Some(name) = dto.name {
            group.name = name.trim().to_string();
        }
        if let Some(description) = dto.description {
            group.description = description;
        }
        if let Some(image) = dto.image {
            if let Some(path) = image.as_deref() {
                self.check_client_image(path, group.image.as_deref())?;
            }
            group.image = image;
        }
        if let Some(dead_line) = dto.dead_line {
            group.dead_line = dead_line;
        }
        if let Some(status) = dto.status {
            group.status = status;
        }
        if let Some(is_active) = dto.is_active {
            group.is_active = is_active;
        }

        match dto.product.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(product) => {
                let snapshot = resolve_snapshot(self.catalog.as_ref(), product).await?;
                group.apply_product_snapshot(snapshot);
            }
            None => {
                if let Some(target) = dto.target_amount {
                    group.target_amount = target;
                }
            }
        }

        let replace_ledger = dto.contributors.is_some();
        if let Some(contributors) = dto.contributors {
            group.replace_contributors(contributors);
        }

        group.validate().map_err(AppError::BadRequest)?;
        group.before_write(self.clock.now());

        let caller = client.trim();
        match repository::update(&self.db, &group, caller, read, replace_ledger).await? {
            UpdateOutcome::Updated => {}
            UpdateOutcome::Missing => return Err(AppError::NotFound("group.not_found")),
            UpdateOutcome::Stale => {
                tracing::info!("Group {} changed since it was read, update by {} rejected", id, caller);
                return Err(AppError::Conflict("group.modified_concurrently"));
            }
        }
        tracing::info!("Group {} updated by {}", id, caller);

        let stored = self.load(&id).await?;
        self.populate(&stored).await
    }

    /// Мягкое или полное удаление группы создателем
    pub async fn delete(&self, client: &str, id: &str, permanent: bool) -> AppResult<()> {
        let id = parse_group_id(id)?;
        assert_creator(&self.db, client, &id).await?;
        let caller = client.trim();

        if !permanent {
            if !repository::soft_delete(&self.db, &id, caller, self.clock.now()).await? {
                return Err(AppError::NotFound("group.not_found"));
            }
            tracing::info!("Group {} disabled by {}", id, caller);
            return Ok(());
        }

        let image = self.load(&id).await?.image;
        if !repository::hard_delete(&self.db, &id, caller).await? {
            return Err(AppError::NotFound("group.not_found"));
        }
        tracing::info!("Group {} permanently deleted by {}", id, caller);
        if let Some(image) = image {
            self.discard_media(&image).await;
        }
        Ok(())
    }

    pub async fn upload_image(
        &self,
        client: &str,
        id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> AppResult<GroupView> {
        let id = parse_group_id(id)?;
        assert_creator(&self.db, client, &id).await?;
        if bytes.is_empty() {
            return Err(AppError::BadRequest("group.image_required"));
        }
        let previous = self.load(&id).await?.image;

        let path = self.media.save(file_name, bytes).await?;
        if !repository::set_image(&self.db, &id, client.trim(), Some(&path), self.clock.now()).await? {
            self.discard_media(&path).await;
            return Err(AppError::NotFound("group.not_found"));
        }
        if let Some(previous) = previous.filter(|p| *p != path) {
            self.discard_media(&previous).await;
        }

        let stored = self.load(&id).await?;
        self.populate(&stored).await
    }

    pub async fn remove_image(&self, client: &str, id: &str) -> AppResult<GroupView> {
        let id = parse_group_id(id)?;
        assert_creator(&self.db, client, &id).await?;
        let previous = self.load(&id).await?.image;

        if !repository::set_image(&self.db, &id, client.trim(), None, self.clock.now()).await? {
            return Err(AppError::NotFound("group.not_found"));
        }
        if let Some(previous) = previous {
            self.discard_media(&previous).await;
        }

        let stored = self.load(&id).await?;
        self.populate(&stored).await
    }

    /// Полная замена реестра. Создатель остаётся в реестре всегда.
    pub async fn replace_contributors(
        &self,
        client: &str,
        id: &str,
        contributors: Vec<Contributor>,
    ) -> AppResult<GroupView> {
        let dto = UpdateGroupDto {
            contributors: Some(contributors),
            ..Default::default()
        };
        self.update(client, id, dto).await
    }

    /// Добавить участников, которых ещё нет в реестре
    pub async fn add_contributors(
        &self,
        client: &str,
        id: &str,
        contributors: Vec<Contributor>,
    ) -> AppResult<GroupView> {
        let id = parse_group_id(id)?;
        assert_creator(&self.db, client, &id).await?;
        for c in &contributors {
            c.validate().map_err(AppError::BadRequest)?;
        }
        let contributors = dedup_by_client(contributors);

        let mut group = self.load(&id).await?;
        let expected = group.add_contributors(contributors.clone());

        let added = repository::add_contributors(
            &self.db,
            &id,
            client.trim(),
            &contributors,
            self.clock.now(),
        )
        .await?
        .ok_or(AppError::NotFound("group.not_found"))?;
        if added as usize != expected {
            tracing::debug!(
                "Group {}: {} contributor(s) added concurrently by another request",
                id,
                expected.saturating_sub(added as usize)
            );
        }

        let stored = self.load(&id).await?;
        self.populate(&stored).await
    }

    pub async fn remove_contributor(
        &self,
        client: &str,
        id: &str,
        target: &str,
    ) -> AppResult<GroupView> {
        let id = parse_group_id(id)?;
        assert_creator(&self.db, client, &id).await?;

        let mut group = self.load(&id).await?;
        if !group.remove_contributor(target).map_err(ledger_error)? {
            return Err(AppError::NotFound("contributor.not_found"));
        }

        let removed =
            repository::remove_contributor(&self.db, &id, client.trim(), target, self.clock.now())
                .await?
                .ok_or(AppError::NotFound("group.not_found"))?;
        if !removed {
            return Err(AppError::NotFound("contributor.not_found"));
        }

        let stored = self.load(&id).await?;
        self.populate(&stored).await
    }

    /// Результат платежа от внешнего платёжного модуля
    pub async fn record_payment(&self, id: &str, dto: RecordPaymentDto) -> AppResult<GroupView> {
        let id = parse_group_id(id)?;
        let now = self.clock.now();

        let mut group = self.load(&id).await?;
        group
            .record_payment(&dto.client, dto.paid_amount, &dto.transaction_id, dto.confirmed, now)
            .map_err(ledger_error)?;

        let recorded = repository::record_payment(
            &self.db,
            &id,
            &dto.client,
            dto.paid_amount,
            &dto.transaction_id,
            dto.confirmed,
            now,
        )
        .await?;
        if !recorded {
            return Err(AppError::NotFound("contributor.not_found"));
        }
        tracing::info!(
            "Payment recorded for {} in group {} (confirmed: {})",
            dto.client,
            id,
            dto.confirmed
        );

        let stored = self.load(&id).await?;
        self.populate(&stored).await
    }

    // ------------------------------------------------------------------------

    pub(crate) async fn load(&self, id: &GroupId) -> AppResult<Group> {
        repository::get_by_id(&self.db, id)
            .await?
            .ok_or(AppError::NotFound("group.not_found"))
    }

    /// Загрузка с закрытием просроченной активной группы
    pub(crate) async fn observe(&self, id: &GroupId) -> AppResult<Group> {
        if repository::close_if_expired(&self.db, id, self.clock.now()).await? {
            tracing::info!("Group {} closed on read: deadline passed", id);
        }
        self.load(id).await
    }

    pub(crate) async fn populate(&self, group: &Group) -> AppResult<GroupView> {
        let mut views = self.populate_many(std::slice::from_ref(group)).await?;
        views
            .pop()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("empty populate result")))
    }

    async fn populate_many(&self, groups: &[Group]) -> AppResult<Vec<GroupView>> {
        let mut client_ids: Vec<String> = Vec::new();
        for group in groups {
            client_ids.push(group.creator_ref().to_string());
            client_ids.extend(group.contributors().iter().map(|c| c.client.clone()));
        }
        client_ids.sort();
        client_ids.dedup();
        let clients = users_repository::find_client_refs(&self.db, &client_ids).await?;

        let mut products: HashMap<String, Option<ProductRef>> = HashMap::new();
        let mut stores: HashMap<String, Option<StoreRef>> = HashMap::new();
        let mut views = Vec::with_capacity(groups.len());
        for group in groups {
            if !products.contains_key(&group.product_ref) {
                let product = self.catalog.product_ref(&group.product_ref).await?;
                products.insert(group.product_ref.clone(), product);
            }
            if !stores.contains_key(&group.store_ref) {
                let store = self.catalog.store_ref(&group.store_ref).await?;
                stores.insert(group.store_ref.clone(), store);
            }
            views.push(GroupView::assemble(
                group,
                products.get(&group.product_ref).cloned().flatten(),
                stores.get(&group.store_ref).cloned().flatten(),
                &clients,
            ));
        }
        Ok(views)
    }

    /// Путь в медиахранилище ставится только загрузкой. Клиент может
    /// передать внешнюю ссылку или оставить текущее изображение группы.
    fn check_client_image(&self, path: &str, current: Option<&str>) -> AppResult<()> {
        if self.media.is_managed(path) && current != Some(path) {
            return Err(AppError::BadRequest("group.invalid_image"));
        }
        Ok(())
    }

    /// Удаление файла без влияния на результат операции
    async fn discard_media(&self, path: &str) {
        if let Err(e) = self.media.remove(path).await {
            tracing::warn!("Failed to remove media {}: {:#}", path, e);
        }
    }
}

//! 检查多选管理

use pacs_core::StudyId;
use std::collections::HashSet;

/// 选择管理器
///
/// 只保证成员判断为 O(1)，不保证内部顺序。
#[derive(Debug, Clone, Default)]
pub struct SelectionManager {
    selected: HashSet<StudyId>,
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切换单个检查的选中状态，返回切换后是否选中
    pub fn toggle(&mut self, id: &StudyId) -> bool {
        if self.selected.remove(id) {
            false
        } else {
            self.selected.insert(id.clone());
            true
        }
    }

    /// 以给定列表整体替换当前选择（幂等）
    pub fn select_all<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a StudyId>,
    {
        self.selected = ids.into_iter().cloned().collect();
    }

    pub fn select_none(&mut self) {
        if !self.selected.is_empty() {
            tracing::debug!("Clearing selection of {} studies", self.selected.len());
        }
        self.selected.clear();
    }

    pub fn is_selected(&self, id: &StudyId) -> bool {
        self.selected.contains(id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StudyId> {
        self.selected.iter()
    }

    /// 仅保留仍在当前视图中的检查，返回被移除的数量
    pub fn retain<'a, I>(&mut self, visible: I) -> usize
    where
        I: IntoIterator<Item = &'a StudyId>,
    {
        let visible: HashSet<&StudyId> = visible.into_iter().collect();
        let before = self.selected.len();
        self.selected.retain(|id| visible.contains(id));
        before - self.selected.len()
    }

    /// 视图中的检查是否全部选中（空视图视为否）
    pub fn all_selected<'a, I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a StudyId>,
    {
        let mut any = false;
        for id in ids {
            any = true;
            if !self.selected.contains(id) {
                return false;
            }
        }
        any
    }

    /// 部分选中（表头复选框的中间态）
    pub fn some_selected<'a, I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a StudyId>,
    {
        let ids: Vec<&StudyId> = ids.into_iter().collect();
        ids.iter().any(|id| self.selected.contains(*id)) && !self.all_selected(ids)
    }
}

//! 虚拟滚动
//!
//! 固定行高下，根据滚动位置计算需要实际渲染的行窗口（含预渲染行）。
//! 也支持分页模式，此时窗口就是当前页。

use pacs_core::{PacsError, Result};
use std::ops::RangeInclusive;

/// 渲染窗口（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub start_index: usize,
    pub end_index: usize,
}

impl RowWindow {
    pub fn len(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start_index..=self.end_index
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }
}

/// 计算渲染窗口
///
/// `start = max(0, floor(offset / row_height) - overscan)`，
/// `end = min(total - 1, ceil((offset + viewport) / row_height) + overscan)`。
/// 没有行或行高无效时返回 `None`；负数或非有限的偏移和视口高度按 0 处理。
pub fn compute_window(
    total_count: usize,
    row_height: f64,
    viewport_height: f64,
    scroll_offset: f64,
    overscan: usize,
) -> Option<RowWindow> {
    if total_count == 0 || !row_height.is_finite() || row_height <= 0.0 {
        return None;
    }

    let offset = non_negative(scroll_offset);
    let viewport = non_negative(viewport_height);
    let last = total_count - 1;

    let first_visible = (offset / row_height).floor() as usize;
    let last_visible = ((offset + viewport) / row_height).ceil() as usize;

    let end_index = last_visible.saturating_add(overscan).min(last);
    let start_index = first_visible.saturating_sub(overscan).min(end_index);

    Some(RowWindow {
        start_index,
        end_index,
    })
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// 显示模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// 单页虚拟滚动
    Virtualized,
    /// 分页
    Paginated { page_size: usize },
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self::Virtualized
    }
}

/// 表格之外的页面布局高度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutHeights {
    pub header: f64,
    pub footer: f64,
    pub action_bar: f64,
    pub tab_navigation: f64,
}

impl LayoutHeights {
    pub fn total(&self) -> f64 {
        self.header + self.footer + self.action_bar + self.tab_navigation
    }
}

impl Default for LayoutHeights {
    fn default() -> Self {
        Self {
            header: 160.0,
            footer: 120.0,
            action_bar: 50.0,
            tab_navigation: 40.0,
        }
    }
}

/// 由窗口高度推导表格视口高度，不低于最小高度
pub fn viewport_height_for(window_height: f64, layout: &LayoutHeights, min_height: f64) -> f64 {
    let available = non_negative(window_height) - layout.total();
    available.max(min_height)
}

/// 上下占位高度，用于撑开滚动区域
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spacers {
    pub top: f64,
    pub bottom: f64,
}

/// 虚拟滚动引擎
#[derive(Debug, Clone)]
pub struct VirtualizationEngine {
    row_height: f64,
    viewport_height: f64,
    scroll_offset: f64,
    overscan: usize,
    total_count: usize,
    mode: DisplayMode,
    page: usize,
}

impl VirtualizationEngine {
    pub fn new(row_height: f64, viewport_height: f64, overscan: usize) -> Result<Self> {
        if !row_height.is_finite() || row_height <= 0.0 {
            return Err(PacsError::Validation(format!(
                "row height must be positive, got {}",
                row_height
            )));
        }

        Ok(Self {
            row_height,
            viewport_height: non_negative(viewport_height),
            scroll_offset: 0.0,
            overscan,
            total_count: 0,
            mode: DisplayMode::Virtualized,
            page: 0,
        })
    }

    pub fn with_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = match mode {
            DisplayMode::Paginated { page_size } => DisplayMode::Paginated {
                page_size: page_size.max(1),
            },
            DisplayMode::Virtualized => DisplayMode::Virtualized,
        };
        self
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn row_height(&self) -> f64 {
        self.row_height
    }

    pub fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// 所有行的总高度
    pub fn total_height(&self) -> f64 {
        self.total_count as f64 * self.row_height
    }

    fn max_scroll_offset(&self) -> f64 {
        (self.total_height() - self.viewport_height).max(0.0)
    }

    /// 视口尺寸变化
    pub fn resize(&mut self, viewport_height: f64) -> Option<RowWindow> {
        self.viewport_height = non_negative(viewport_height);
        self.scroll_offset = self.scroll_offset.min(self.max_scroll_offset());
        self.window()
    }

    /// 滚动到指定偏移，超出可滚动范围时截断
    pub fn scroll_to(&mut self, offset: f64) -> Option<RowWindow> {
        self.scroll_offset = non_negative(offset).min(self.max_scroll_offset());
        self.window()
    }

    /// 行数变化（例如过滤后），旧的滚动位置和页码会被截断
    pub fn set_total_count(&mut self, total_count: usize) -> Option<RowWindow> {
        if total_count != self.total_count {
            tracing::debug!("Row count changed {} -> {}", self.total_count, total_count);
        }
        self.total_count = total_count;
        self.scroll_offset = self.scroll_offset.min(self.max_scroll_offset());
        self.page = self.page.min(self.page_count().saturating_sub(1));
        self.window()
    }

    /// 总页数；虚拟滚动模式下恒为 1
    pub fn page_count(&self) -> usize {
        match self.mode {
            DisplayMode::Virtualized => 1,
            DisplayMode::Paginated { page_size } => {
                ((self.total_count + page_size - 1) / page_size).max(1)
            }
        }
    }

    pub fn set_page(&mut self, page: usize) -> Option<RowWindow> {
        self.page = page.min(self.page_count() - 1);
        self.window()
    }

    /// 当前渲染窗口
    pub fn window(&self) -> Option<RowWindow> {
        match self.mode {
            DisplayMode::Virtualized => compute_window(
                self.total_count,
                self.row_height,
                self.viewport_height,
                self.scroll_offset,
                self.overscan,
            ),
            DisplayMode::Paginated { page_size } => {
                let start_index = self.page * page_size;
                if start_index >= self.total_count {
                    return None;
                }
                let end_index = (start_index + page_size).min(self.total_count) - 1;
                Some(RowWindow {
                    start_index,
                    end_index,
                })
            }
        }
    }

    /// 窗口上下的占位高度；分页模式下没有占位
    pub fn spacers(&self) -> Spacers {
        match (self.mode, self.window()) {
            (DisplayMode::Virtualized, Some(window)) => Spacers {
                top: window.start_index as f64 * self.row_height,
                bottom: (self.total_count - window.end_index - 1) as f64 * self.row_height,
            },
            _ => Spacers::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_window() {
        let window = compute_window(1000, 40.0, 700.0, 0.0, 5).unwrap();
        assert_eq!(window.start_index, 0);
        assert_eq!(window.end_index, 23);

        let window = compute_window(10, 40.0, 700.0, 0.0, 5).unwrap();
        assert_eq!(window.end_index, 9);
    }

    #[test]
    fn test_window_stays_in_bounds() {
        for total in [0usize, 1, 2, 17, 100, 5000] {
            for offset in [0.0, 13.0, 400.0, 39_999.0, 1.0e9, -50.0, f64::NAN] {
                for overscan in [0usize, 5, 10] {
                    let Some(window) = compute_window(total, 40.0, 700.0, offset, overscan) else {
                        assert_eq!(total, 0);
                        continue;
                    };
                    assert!(window.start_index <= window.end_index);
                    assert!(window.end_index < total);
                    let bound = (700.0f64 / 40.0).ceil() as usize + 2 * overscan + 2;
                    assert!(window.len() <= bound, "window {:?} exceeds {}", window, bound);
                }
            }
        }
    }

    #[test]
    fn test_invalid_row_height() {
        assert!(compute_window(10, 0.0, 700.0, 0.0, 5).is_none());
        assert!(compute_window(10, f64::NAN, 700.0, 0.0, 5).is_none());
        assert!(VirtualizationEngine::new(-1.0, 700.0, 5).is_err());
    }

    #[test]
    fn test_scroll_is_clamped() {
        let mut engine = VirtualizationEngine::new(40.0, 400.0, 2).unwrap();
        engine.set_total_count(100);

        let window = engine.scroll_to(1.0e6).unwrap();
        assert_eq!(engine.scroll_offset(), 4000.0 - 400.0);
        assert_eq!(window.end_index, 99);

        // 过滤后行数变少，旧位置被截断
        let window = engine.set_total_count(5).unwrap();
        assert_eq!(engine.scroll_offset(), 0.0);
        assert_eq!(window.range(), 0..=4);
        assert!(engine.set_total_count(0).is_none());
    }

    #[test]
    fn test_resize_recomputes() {
        let mut engine = VirtualizationEngine::new(44.0, 440.0, 0).unwrap();
        engine.set_total_count(1000);
        assert_eq!(engine.window().unwrap().end_index, 10);

        let window = engine.resize(880.0).unwrap();
        assert_eq!(window.end_index, 20);
    }

    #[test]
    fn test_spacers() {
        let mut engine = VirtualizationEngine::new(40.0, 400.0, 0).unwrap();
        engine.set_total_count(100);
        engine.scroll_to(800.0);

        let window = engine.window().unwrap();
        let spacers = engine.spacers();
        assert_eq!(spacers.top, window.start_index as f64 * 40.0);
        let rendered = window.len() as f64 * 40.0;
        assert_eq!(spacers.top + rendered + spacers.bottom, engine.total_height());
    }

    #[test]
    fn test_pagination() {
        let mut engine = VirtualizationEngine::new(40.0, 400.0, 5)
            .unwrap()
            .with_mode(DisplayMode::Paginated { page_size: 50 });
        engine.set_total_count(120);
        assert_eq!(engine.page_count(), 3);

        let window = engine.set_page(2).unwrap();
        assert_eq!(window.range(), 100..=119);

        engine.set_page(10);
        assert_eq!(engine.page(), 2);

        engine.set_total_count(30);
        assert_eq!(engine.page(), 0);
        assert_eq!(engine.spacers(), Spacers::default());
    }

    #[test]
    fn test_viewport_height_for() {
        let layout = LayoutHeights::default();
        assert_eq!(viewport_height_for(1000.0, &layout, 400.0), 630.0);
        assert_eq!(viewport_height_for(500.0, &layout, 400.0), 400.0);
    }
}
